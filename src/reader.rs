//! Top-level reader orchestration (§4.7): locates `startxref`, walks the
//! `/Prev` chain building the cross-reference cache and trailer stack,
//! resolves the security handler from `/Encrypt`, and decrypts objects
//! fetched through it.
//!
//! General PDF object syntax (indirect object bodies, object-stream
//! members) is tokenized by whatever full parser a caller already has;
//! this core only owns the format that's genuinely narrow enough not to
//! need one: classic xref table text. That boundary is expressed as the
//! [`DocumentParser`] trait below.

use std::collections::HashSet;

use crate::crypt_filter::CryptFilterConfig;
use crate::error::{CoreError, ReadError, Result, XrefError};
use crate::handlers::public_key::EnvelopeKeyDecrypter;
use crate::handlers::{AuthResult, Handler, HandlerRegistry};
use crate::historical::{HistoricalResolver, ObjectSource};
use crate::model::{Dictionary, Object, ObjectId, Stream};
use crate::xref::{XrefCache, XrefEntry};

/// The one hook a reader needs into a general PDF object tokenizer.
pub trait DocumentParser {
    fn parse_indirect_object(&self, buffer: &[u8], offset: usize) -> Result<(ObjectId, Object)>;
    fn parse_trailer(&self, buffer: &[u8], offset: usize) -> Result<Dictionary>;
    fn parse_object_stream_member(&self, container: &Stream, index_within: u16) -> Result<Object>;
}

pub struct PdfReader<'a> {
    buffer: &'a [u8],
    parser: &'a dyn DocumentParser,
    registry: HandlerRegistry,
    xref_cache: XrefCache,
    trailers: Vec<Dictionary>,
    handler: Option<Handler>,
    first_id: Vec<u8>,
}

impl<'a> PdfReader<'a> {
    pub fn new(buffer: &'a [u8], parser: &'a dyn DocumentParser, registry: HandlerRegistry) -> Self {
        PdfReader {
            buffer,
            parser,
            registry,
            xref_cache: XrefCache::new(),
            trailers: Vec::new(),
            handler: None,
            first_id: Vec::new(),
        }
    }

    /// §4.7 `process_data_at_eof`: finds `startxref` and walks every
    /// section reachable from it (direct `/Prev` chain and hybrid-reference
    /// `/XRefStm` side streams), then resolves `/Encrypt` if present.
    pub fn load(&mut self) -> Result<()> {
        let mut offset = self.locate_startxref()?;
        let mut visited = HashSet::new();

        loop {
            if !visited.insert(offset) {
                break; // cyclical /Prev chain; the newest copy already won
            }
            let trailer = self.read_section_at(offset)?;

            let prev = trailer.get(b"Prev").and_then(Object::as_i64).ok();
            self.trailers.push(trailer);

            match prev {
                Some(p) if p >= 0 && (p as usize) < self.buffer.len() => offset = p as usize,
                Some(_) => return Err(CoreError::Read(XrefError::PrevStart.into())),
                None => break,
            }
        }

        self.xref_cache.finalize()?;

        if let Some(newest) = self.trailers.first() {
            self.first_id = newest
                .get(b"ID")
                .and_then(Object::as_array)
                .ok()
                .and_then(|ids| ids.first())
                .and_then(|id| id.as_str().ok())
                .map(|bytes| bytes.to_vec())
                .unwrap_or_default();

            if let Ok(encrypt_entry) = newest.get(b"Encrypt") {
                let encrypt_dict = self.resolve_as_dict(encrypt_entry)?;
                self.handler = Some(self.registry.build(&encrypt_dict)?);
            }
        }

        Ok(())
    }

    fn resolve_as_dict(&self, object: &Object) -> Result<Dictionary> {
        match object {
            Object::Dictionary(dict) => Ok(dict.clone()),
            Object::Reference(id) => {
                let entry = self.xref_cache.get_historical_ref(*id, self.current_revision())?;
                match entry {
                    XrefEntry::Normal { offset, .. } => {
                        let (_, resolved) = self.parser.parse_indirect_object(self.buffer, offset as usize)?;
                        resolved.as_dict().cloned()
                    }
                    _ => Err(CoreError::Read(ReadError::ObjectNotFound(*id))),
                }
            }
            _ => Err(CoreError::Read(ReadError::ObjectType { expected: "Dictionary" })),
        }
    }

    fn read_section_at(&mut self, offset: usize) -> Result<Dictionary> {
        if offset > self.buffer.len() {
            return Err(CoreError::Read(ReadError::Offset(offset)));
        }
        let scan_from = skip_whitespace(self.buffer, offset);
        if self.buffer[scan_from..].starts_with(b"xref") {
            self.read_classic_table(scan_from)
        } else {
            self.read_xref_stream(offset)
        }
    }

    fn read_classic_table(&mut self, start: usize) -> Result<Dictionary> {
        self.xref_cache.begin_section();
        let mut pos = start + b"xref".len();

        loop {
            pos = skip_whitespace(self.buffer, pos);
            if self.buffer[pos..].starts_with(b"trailer") {
                pos += b"trailer".len();
                break;
            }

            let (header_line, line_end) = read_line(self.buffer, pos).ok_or(CoreError::Read(XrefError::Parse.into()))?;
            let mut fields = header_line.split(|&b| b == b' ').filter(|s| !s.is_empty());
            let subsection_start: u32 = parse_ascii_u32(fields.next().ok_or(CoreError::Read(XrefError::Parse.into()))?)?;
            let count: u32 = parse_ascii_u32(fields.next().ok_or(CoreError::Read(XrefError::Parse.into()))?)?;
            pos = line_end;

            for i in 0..count {
                if pos + 20 > self.buffer.len() {
                    return Err(CoreError::Read(XrefError::Parse.into()));
                }
                let row = &self.buffer[pos..pos + 20];
                pos += 20;
                let mut row_fields = row[..18].split(|&b| b == b' ').filter(|s| !s.is_empty());
                let field0 = parse_ascii_u64(row_fields.next().ok_or(CoreError::Read(XrefError::Parse.into()))?)?;
                let generation = parse_ascii_u32(row_fields.next().ok_or(CoreError::Read(XrefError::Parse.into()))?)? as u16;
                let marker = row_fields.next().and_then(|m| m.first().copied()).ok_or(CoreError::Read(XrefError::Parse.into()))?;

                let id = subsection_start + i;
                match marker {
                    b'n' => self.xref_cache.put_ref(id, generation, XrefEntry::Normal { offset: field0, generation }),
                    b'f' => self.xref_cache.free_ref(id, generation),
                    _ => return Err(CoreError::Read(XrefError::Parse.into())),
                }
            }
        }

        let trailer = self.parser.parse_trailer(self.buffer, pos)?;

        // Hybrid-reference file (§4.5): a classic table's trailer can name
        // an xref stream carrying compressed-object entries the table
        // itself can't express. Those entries describe the same revision
        // as this table, so they're folded into this still-open section
        // rather than opening a second one for it.
        if let Ok(xrefstm) = trailer.get(b"XRefStm").and_then(Object::as_i64) {
            if xrefstm >= 0 {
                self.read_xref_stream_rows(xrefstm as usize)?;
            }
        }

        self.xref_cache.finish_section(start as u64);
        Ok(trailer)
    }

    /// §4.5: `/Index` pairs (default `[0 Size]`), `/W` field widths, types
    /// 0 (free), 1 (in-use), 2 (compressed); a zero-width field 0 defaults
    /// its type to 1, any other zero-width field defaults to value 0.
    fn read_xref_stream(&mut self, offset: usize) -> Result<Dictionary> {
        self.xref_cache.begin_section();
        self.xref_cache.mark_current_as_stream();
        let dict = self.read_xref_stream_rows(offset)?;
        self.xref_cache.finish_section(offset as u64);
        Ok(dict)
    }

    /// Decodes an xref stream's rows into whichever section is currently
    /// open, without beginning or finishing one itself. Shared by a
    /// standalone xref stream section and a hybrid-reference classic
    /// table's `/XRefStm` side stream.
    fn read_xref_stream_rows(&mut self, offset: usize) -> Result<Dictionary> {
        let (_, object) = self.parser.parse_indirect_object(self.buffer, offset)?;
        let stream = object.as_stream()?.clone();
        let dict = stream.dict.clone();

        let size = dict.get(b"Size")?.as_i64()? as u32;
        let widths: Vec<usize> = dict
            .get(b"W")?
            .as_array()?
            .iter()
            .map(|o| o.as_i64().map(|v| v as usize))
            .collect::<Result<_>>()?;
        if widths.len() != 3 {
            return Err(CoreError::Read(XrefError::StreamStart.into()));
        }

        let index_pairs: Vec<(u32, u32)> = if let Ok(index_arr) = dict.get(b"Index").and_then(Object::as_array) {
            index_arr
                .chunks(2)
                .map(|pair| Ok((pair[0].as_i64()? as u32, pair[1].as_i64()? as u32)))
                .collect::<Result<_>>()?
        } else {
            vec![(0, size)]
        };

        let data = stream.data();
        let row_width = widths[0] + widths[1] + widths[2];
        let mut cursor = 0usize;

        for (subsection_start, count) in index_pairs {
            for i in 0..count {
                if cursor + row_width > data.len() {
                    return Err(CoreError::Read(XrefError::StreamStart.into()));
                }
                let row = &data[cursor..cursor + row_width];
                cursor += row_width;

                let mut field_offset = 0;
                let entry_type = if widths[0] == 0 { 1 } else { read_be(&row[field_offset..field_offset + widths[0]]) };
                field_offset += widths[0];
                let field2 = read_be(&row[field_offset..field_offset + widths[1]]);
                field_offset += widths[1];
                let field3 = read_be(&row[field_offset..field_offset + widths[2]]);

                let id = subsection_start + i;
                match entry_type {
                    0 => self.xref_cache.free_ref(id, field3 as u16),
                    1 => self.xref_cache.put_ref(id, field3 as u16, XrefEntry::Normal { offset: field2, generation: field3 as u16 }),
                    2 => self.xref_cache.put_ref(id, 0, XrefEntry::Compressed { container: field2 as u32, index_within: field3 as u16 }),
                    _ => return Err(CoreError::Read(XrefError::StreamStart.into())),
                }
            }
        }

        Ok(dict)
    }

    fn current_revision(&self) -> usize {
        self.xref_cache.total_revisions().saturating_sub(1)
    }

    fn locate_startxref(&self) -> Result<usize> {
        let tail_start = self.buffer.len().saturating_sub(1024);
        let eof_pos = search_substring(self.buffer, b"%%EOF", tail_start).ok_or(CoreError::Read(XrefError::Start.into()))?;
        let keyword_pos = search_substring(self.buffer, b"startxref", tail_start.max(eof_pos.saturating_sub(40)))
            .ok_or(CoreError::Read(XrefError::Start.into()))?;
        let digits_start = skip_whitespace(self.buffer, keyword_pos + b"startxref".len());
        let (line, _) = read_line(self.buffer, digits_start).ok_or(CoreError::Read(XrefError::Start.into()))?;
        let offset = parse_ascii_u64(trim(line)).map_err(|_| CoreError::Read(XrefError::Start.into()))?;
        Ok(offset as usize)
    }

    /// §4.7 `get_object`: resolves against the newest revision and runs the
    /// result through the security handler's crypt filters, if any.
    pub fn get_object(&self, id: ObjectId) -> Result<Object> {
        let entry = self.xref_cache.get_historical_ref(id, self.current_revision())?;
        self.fetch_and_decrypt(id, entry)
    }

    pub fn get_object_at(&self, offset: usize) -> Result<(ObjectId, Object)> {
        let (id, object) = self.parser.parse_indirect_object(self.buffer, offset)?;
        Ok((id, self.decrypt_object(id, object)?))
    }

    fn fetch_and_decrypt(&self, id: ObjectId, entry: XrefEntry) -> Result<Object> {
        if entry.is_free() {
            return Err(CoreError::Read(ReadError::Freed));
        }
        let object = match entry {
            XrefEntry::Normal { offset, .. } => self.parser.parse_indirect_object(self.buffer, offset as usize).map(|(_, o)| o)?,
            XrefEntry::Compressed { container, index_within } => {
                let container_entry = self.xref_cache.get_historical_ref((container, 0), self.current_revision())?;
                let XrefEntry::Normal { offset, .. } = container_entry else {
                    return Err(CoreError::Read(ReadError::ObjectNotFound(id)));
                };
                let (_, container_object) = self.parser.parse_indirect_object(self.buffer, offset as usize)?;
                self.parser.parse_object_stream_member(container_object.as_stream()?, index_within)?
            }
            XrefEntry::Free => unreachable!("checked above"),
        };
        self.decrypt_object(id, object)
    }

    pub fn decrypt_object(&self, id: ObjectId, object: Object) -> Result<Object> {
        match &self.handler {
            Some(handler) => decrypt_value(object, id, handler.crypt_filters(), handler.encrypt_metadata()),
            None => Ok(object),
        }
    }

    pub fn get_historical_resolver(&self, revision: usize) -> HistoricalResolver<'_> {
        HistoricalResolver::new(&self.xref_cache, self, &self.trailers, revision)
    }

    pub fn total_revisions(&self) -> usize {
        self.xref_cache.total_revisions()
    }

    pub fn trailer(&self) -> &Dictionary {
        self.trailers.first().expect("load() must run before trailer()")
    }

    pub fn handler(&self) -> Option<&Handler> {
        self.handler.as_ref()
    }

    /// §4.3 authentication entry point for the `/Standard` handler. An
    /// unencrypted document authenticates trivially as owner.
    pub fn authenticate(&self, password: &[u8]) -> Result<AuthResult> {
        match &self.handler {
            Some(Handler::Standard(handler)) => handler.authenticate(password, &self.first_id),
            Some(Handler::PublicKey(_)) => Err(CoreError::InvalidArgument(
                "document uses a public-key handler; call decrypt_pubkey instead",
            )),
            None => Ok(AuthResult::Owner),
        }
    }

    /// Same as [`Self::authenticate`], but for an actual password string
    /// rather than bytes already in the revision's encoding: applies
    /// PDFDocEncoding (legacy) or SASLprep (R6) per §4.1 before
    /// authenticating.
    pub fn authenticate_text(&self, password: &str) -> Result<AuthResult> {
        match &self.handler {
            Some(Handler::Standard(handler)) => handler.authenticate_text(password, &self.first_id),
            Some(Handler::PublicKey(_)) => Err(CoreError::InvalidArgument(
                "document uses a public-key handler; call decrypt_pubkey instead",
            )),
            None => Ok(AuthResult::Owner),
        }
    }

    /// §4.4.1 authentication entry point for the `/Adobe.PubSec` handler.
    pub fn decrypt_pubkey(&self, decrypter: &dyn EnvelopeKeyDecrypter) -> Result<AuthResult> {
        match &self.handler {
            Some(Handler::PublicKey(handler)) => handler.authenticate(decrypter),
            Some(Handler::Standard(_)) => Err(CoreError::InvalidArgument(
                "document uses a password handler; call authenticate instead",
            )),
            None => Ok(AuthResult::Owner),
        }
    }
}

impl<'a> ObjectSource for PdfReader<'a> {
    fn fetch_at(&self, id: ObjectId, entry: XrefEntry) -> Result<Object> {
        self.fetch_and_decrypt(id, entry)
    }
}

fn decrypt_value(object: Object, id: ObjectId, filters: &CryptFilterConfig, encrypt_metadata: bool) -> Result<Object> {
    match object {
        Object::String(bytes, format) => {
            let decrypted = match filters.string_filter() {
                Some(filter) => filter.decrypt(id, &bytes)?,
                None => bytes,
            };
            Ok(Object::String(decrypted, format))
        }
        Object::Array(items) => Ok(Object::Array(
            items.into_iter().map(|item| decrypt_value(item, id, filters, encrypt_metadata)).collect::<Result<_>>()?,
        )),
        Object::Dictionary(dict) => Ok(Object::Dictionary(decrypt_dict(dict, id, filters, encrypt_metadata)?)),
        Object::Stream(stream) => {
            let is_metadata = stream.dict.has_type(b"Metadata");
            let decrypted_dict = decrypt_dict(stream.dict, id, filters, encrypt_metadata)?;
            let content = if is_metadata && !encrypt_metadata {
                stream.content
            } else {
                match filters.stream_filter() {
                    Some(filter) => filter.decrypt(id, &stream.content)?,
                    None => stream.content,
                }
            };
            Ok(Object::Stream(Stream::new(decrypted_dict, content)))
        }
        other => Ok(other),
    }
}

fn decrypt_dict(dict: Dictionary, id: ObjectId, filters: &CryptFilterConfig, encrypt_metadata: bool) -> Result<Dictionary> {
    let mut out = Dictionary::new();
    for (key, value) in dict.iter() {
        out.set(key.clone(), decrypt_value(value.clone(), id, filters, encrypt_metadata)?);
    }
    Ok(out)
}

fn read_be(bytes: &[u8]) -> u64 {
    bytes.iter().fold(0u64, |acc, &b| (acc << 8) | b as u64)
}

fn skip_whitespace(buffer: &[u8], mut pos: usize) -> usize {
    while pos < buffer.len() && buffer[pos].is_ascii_whitespace() {
        pos += 1;
    }
    pos
}

fn trim(bytes: &[u8]) -> &[u8] {
    let start = bytes.iter().position(|b| !b.is_ascii_whitespace()).unwrap_or(bytes.len());
    let end = bytes.iter().rposition(|b| !b.is_ascii_whitespace()).map(|p| p + 1).unwrap_or(start);
    &bytes[start..end]
}

fn read_line(buffer: &[u8], pos: usize) -> Option<(&[u8], usize)> {
    if pos > buffer.len() {
        return None;
    }
    let end = buffer[pos..].iter().position(|&b| b == b'\n' || b == b'\r').map(|i| pos + i).unwrap_or(buffer.len());
    let mut next = end;
    while next < buffer.len() && (buffer[next] == b'\n' || buffer[next] == b'\r') {
        next += 1;
    }
    Some((&buffer[pos..end], next))
}

fn parse_ascii_u32(bytes: &[u8]) -> Result<u32> {
    parse_ascii_u64(bytes).map(|v| v as u32)
}

fn parse_ascii_u64(bytes: &[u8]) -> Result<u64> {
    let bytes = trim(bytes);
    if bytes.is_empty() || !bytes.iter().all(u8::is_ascii_digit) {
        return Err(CoreError::Read(XrefError::Parse.into()));
    }
    std::str::from_utf8(bytes)
        .ok()
        .and_then(|s| s.parse().ok())
        .ok_or(CoreError::Read(XrefError::Parse.into()))
}

fn search_substring(buffer: &[u8], pattern: &[u8], start_pos: usize) -> Option<usize> {
    buffer[start_pos.min(buffer.len())..].windows(pattern.len()).position(|w| w == pattern).map(|i| i + start_pos)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dictionary;
    use std::cell::RefCell;
    use std::collections::VecDeque;

    struct StubParser {
        trailers: RefCell<VecDeque<Dictionary>>,
    }

    impl DocumentParser for StubParser {
        fn parse_indirect_object(&self, _buffer: &[u8], _offset: usize) -> Result<(ObjectId, Object)> {
            Err(CoreError::Read(ReadError::ObjectNotFound((0, 0))))
        }
        fn parse_trailer(&self, _buffer: &[u8], _offset: usize) -> Result<Dictionary> {
            self.trailers.borrow_mut().pop_front().ok_or(CoreError::Read(ReadError::Trailer))
        }
        fn parse_object_stream_member(&self, _container: &Stream, _index_within: u16) -> Result<Object> {
            Err(CoreError::Read(ReadError::ObjectNotFound((0, 0))))
        }
    }

    fn xref_table(rows: &[(u32, u32, char)], start_id: u32) -> String {
        let mut out = format!("xref\n{} {}\n", start_id, rows.len());
        for (offset, gen, kind) in rows {
            out.push_str(&format!("{:010} {:05} {} \n", offset, gen, kind));
        }
        out.push_str("trailer\n");
        out
    }

    #[test]
    fn single_revision_table_loads_and_is_unencrypted() {
        let body = xref_table(&[(9, 0, 'n'), (0, 65535, 'f')], 0);
        let doc = format!("%PDF-1.4\n{}startxref\n0\n%%EOF", body);
        let buffer = doc.into_bytes();
        let parser = StubParser {
            trailers: RefCell::new(VecDeque::from([dictionary! { "Size" => 2, "Root" => (1u32, 0u16) }])),
        };
        let mut reader = PdfReader::new(&buffer, &parser, HandlerRegistry::with_defaults());
        reader.load().unwrap();

        assert_eq!(reader.total_revisions(), 1);
        assert!(reader.handler().is_none());
        assert_eq!(reader.authenticate(b"anything").unwrap(), AuthResult::Owner);
    }

    #[test]
    fn prev_chain_produces_one_trailer_per_revision() {
        let newest = xref_table(&[(500, 0, 'n')], 5);
        let older = xref_table(&[(9, 0, 'n')], 0);
        let doc = format!("%PDF-1.4\n{}{}startxref\n{}\n%%EOF", older, newest, older.len() + 9);
        let buffer = doc.into_bytes();

        let newest_trailer_offset_marker = b"%PDF-1.4\n".len() + older.len();
        let parser = StubParser {
            trailers: RefCell::new(VecDeque::from([
                dictionary! { "Size" => 6, "Root" => (1u32, 0u16), "Prev" => (newest_trailer_offset_marker as i64 - older.len() as i64) },
                dictionary! { "Size" => 2, "Root" => (1u32, 0u16) },
            ])),
        };
        let mut reader = PdfReader::new(&buffer, &parser, HandlerRegistry::with_defaults());
        reader.load().unwrap();

        assert_eq!(reader.total_revisions(), 2);
    }
}
