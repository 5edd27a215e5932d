//! A minimal PDF object tokenizer (§4.7's `DocumentParser` hook, ambient
//! glue rather than spec'd core functionality): enough of the object
//! grammar to read indirect object headers, dictionaries, arrays, names,
//! numbers, strings and references, plus object-stream members. Content
//! stream operators, inline images, and a writer stay out of scope, same
//! as [`crate::model`]'s own boundary.

use crate::error::{CoreError, ReadError, Result};
use crate::model::{Dictionary, Object, ObjectId, Stream, StringFormat};
use crate::reader::DocumentParser;

/// The tokenizer this core ships. Stateless; holds no buffer of its own so
/// one instance can serve every object fetch a reader makes.
#[derive(Debug, Default)]
pub struct BasicParser;

impl BasicParser {
    pub fn new() -> Self {
        BasicParser
    }
}

impl DocumentParser for BasicParser {
    fn parse_indirect_object(&self, buffer: &[u8], offset: usize) -> Result<(ObjectId, Object)> {
        let mut lexer = Lexer::new(buffer, offset);
        let id = lexer.expect_u32()?;
        let generation = lexer.expect_u32()? as u16;
        lexer.expect_keyword(b"obj")?;
        let object = lexer.parse_object()?;

        lexer.skip_ws_and_comments();
        let object = if lexer.matches_keyword(b"stream") {
            lexer.advance(b"stream".len());
            if lexer.peek() == Some(b'\r') {
                lexer.advance(1);
            }
            if lexer.peek() == Some(b'\n') {
                lexer.advance(1);
            }
            let dict = object.as_dict()?.clone();
            let length = dict.get(b"Length").and_then(Object::as_i64).ok();
            let content = lexer.read_stream_body(length)?;
            Object::Stream(Stream::new(dict, content))
        } else {
            object
        };

        Ok(((id, generation), object))
    }

    fn parse_trailer(&self, buffer: &[u8], offset: usize) -> Result<Dictionary> {
        let mut lexer = Lexer::new(buffer, offset);
        let object = lexer.parse_object()?;
        Ok(object.as_dict()?.clone())
    }

    fn parse_object_stream_member(&self, container: &Stream, index_within: u16) -> Result<Object> {
        let count = container.dict.get(b"N")?.as_i64()? as usize;
        let first = container.dict.get(b"First")?.as_i64()? as usize;
        let data = container.data();

        let mut header = Lexer::new(data, 0);
        let mut relative_offsets = Vec::with_capacity(count);
        for _ in 0..count {
            let _object_number = header.expect_u32()?;
            let relative_offset = header.expect_u32()? as usize;
            relative_offsets.push(relative_offset);
        }

        let relative_offset = *relative_offsets
            .get(index_within as usize)
            .ok_or(CoreError::Read(ReadError::ObjectNotFound((0, index_within))))?;
        let mut member = Lexer::new(data, first + relative_offset);
        member.parse_object()
    }
}

struct Lexer<'a> {
    buf: &'a [u8],
    pos: usize,
}

fn parse_err() -> CoreError {
    CoreError::Read(ReadError::Parse { offset: 0 })
}

impl<'a> Lexer<'a> {
    fn new(buf: &'a [u8], pos: usize) -> Self {
        Lexer { buf, pos }
    }

    fn peek(&self) -> Option<u8> {
        self.buf.get(self.pos).copied()
    }

    fn peek_at(&self, delta: usize) -> Option<u8> {
        self.buf.get(self.pos + delta).copied()
    }

    fn advance(&mut self, n: usize) {
        self.pos += n;
    }

    fn matches_keyword(&self, keyword: &[u8]) -> bool {
        self.buf[self.pos.min(self.buf.len())..].starts_with(keyword)
    }

    fn skip_ws_and_comments(&mut self) {
        loop {
            while matches!(self.peek(), Some(b) if b.is_ascii_whitespace()) {
                self.pos += 1;
            }
            if self.peek() == Some(b'%') {
                while !matches!(self.peek(), None | Some(b'\n') | Some(b'\r')) {
                    self.pos += 1;
                }
            } else {
                break;
            }
        }
    }

    fn expect_keyword(&mut self, keyword: &[u8]) -> Result<()> {
        self.skip_ws_and_comments();
        if self.matches_keyword(keyword) {
            self.advance(keyword.len());
            Ok(())
        } else {
            Err(parse_err())
        }
    }

    fn read_token(&mut self) -> &'a [u8] {
        let start = self.pos;
        while matches!(self.peek(), Some(b) if is_regular(b)) {
            self.pos += 1;
        }
        &self.buf[start..self.pos]
    }

    fn expect_u32(&mut self) -> Result<u32> {
        self.skip_ws_and_comments();
        let token = self.read_token();
        std::str::from_utf8(token).ok().and_then(|s| s.parse().ok()).ok_or_else(parse_err)
    }

    /// `/Length` that's itself an indirect reference can't be resolved here
    /// (this lexer has no access to the reader's xref cache); in that case
    /// fall back to scanning for `endstream`.
    fn read_stream_body(&mut self, length: Option<i64>) -> Result<Vec<u8>> {
        match length {
            Some(len) if len >= 0 && self.pos + len as usize <= self.buf.len() => {
                let content = self.buf[self.pos..self.pos + len as usize].to_vec();
                self.pos += len as usize;
                Ok(content)
            }
            _ => {
                let marker = b"endstream";
                let found = self.buf[self.pos..]
                    .windows(marker.len())
                    .position(|w| w == marker)
                    .ok_or_else(parse_err)?;
                let content = self.buf[self.pos..self.pos + found].to_vec();
                self.pos += found;
                Ok(content)
            }
        }
    }

    fn parse_object(&mut self) -> Result<Object> {
        self.skip_ws_and_comments();
        match self.peek() {
            Some(b'/') => self.parse_name(),
            Some(b'(') => self.parse_literal_string(),
            Some(b'<') if self.peek_at(1) == Some(b'<') => self.parse_dict(),
            Some(b'<') => self.parse_hex_string(),
            Some(b'[') => self.parse_array(),
            Some(b't') if self.matches_keyword(b"true") => {
                self.advance(4);
                Ok(Object::Boolean(true))
            }
            Some(b'f') if self.matches_keyword(b"false") => {
                self.advance(5);
                Ok(Object::Boolean(false))
            }
            Some(b'n') if self.matches_keyword(b"null") => {
                self.advance(4);
                Ok(Object::Null)
            }
            Some(c) if c == b'+' || c == b'-' || c == b'.' || c.is_ascii_digit() => self.parse_number_or_reference(),
            _ => Err(parse_err()),
        }
    }

    fn parse_name(&mut self) -> Result<Object> {
        self.advance(1); // '/'
        let start = self.pos;
        while matches!(self.peek(), Some(b) if is_regular(b)) {
            self.pos += 1;
        }
        Ok(Object::Name(self.buf[start..self.pos].to_vec()))
    }

    fn parse_number_or_reference(&mut self) -> Result<Object> {
        let checkpoint = self.pos;
        let token = self.read_token();
        let text = std::str::from_utf8(token).map_err(|_| parse_err())?;

        if let Ok(first) = text.parse::<u32>() {
            let after_first = self.pos;
            self.skip_ws_and_comments();
            let second_start = self.pos;
            let second_token = self.read_token();
            if let Ok(generation) = std::str::from_utf8(second_token).unwrap_or("").parse::<u16>() {
                self.skip_ws_and_comments();
                if self.matches_keyword(b"R") && !matches!(self.peek_at(1), Some(b) if is_regular(b)) {
                    self.advance(1);
                    return Ok(Object::Reference((first, generation)));
                }
            }
            self.pos = after_first;
            let _ = second_start;
        }

        if let Ok(integer) = text.parse::<i64>() {
            return Ok(Object::Integer(integer));
        }
        if let Ok(real) = text.parse::<f32>() {
            return Ok(Object::Real(real));
        }
        self.pos = checkpoint;
        Err(parse_err())
    }

    fn parse_literal_string(&mut self) -> Result<Object> {
        self.advance(1); // '('
        let mut out = Vec::new();
        let mut depth = 1u32;
        while let Some(b) = self.peek() {
            self.pos += 1;
            match b {
                b'\\' => {
                    let escaped = self.peek().ok_or_else(parse_err)?;
                    self.pos += 1;
                    match escaped {
                        b'n' => out.push(b'\n'),
                        b'r' => out.push(b'\r'),
                        b't' => out.push(b'\t'),
                        b'b' => out.push(0x08),
                        b'f' => out.push(0x0C),
                        b'(' | b')' | b'\\' => out.push(escaped),
                        b'\r' | b'\n' => {}
                        d if d.is_ascii_digit() => {
                            let mut value = (d - b'0') as u16;
                            for _ in 0..2 {
                                if matches!(self.peek(), Some(c) if c.is_ascii_digit()) {
                                    value = value * 8 + (self.peek().unwrap() - b'0') as u16;
                                    self.pos += 1;
                                } else {
                                    break;
                                }
                            }
                            out.push(value as u8);
                        }
                        other => out.push(other),
                    }
                }
                b'(' => {
                    depth += 1;
                    out.push(b);
                }
                b')' => {
                    depth -= 1;
                    if depth == 0 {
                        break;
                    }
                    out.push(b);
                }
                other => out.push(other),
            }
        }
        Ok(Object::String(out, StringFormat::Literal))
    }

    fn parse_hex_string(&mut self) -> Result<Object> {
        self.advance(1); // '<'
        let mut digits = Vec::new();
        while let Some(b) = self.peek() {
            self.pos += 1;
            if b == b'>' {
                break;
            }
            if b.is_ascii_hexdigit() {
                digits.push(b);
            }
        }
        if digits.len() % 2 == 1 {
            digits.push(b'0');
        }
        let bytes = digits
            .chunks(2)
            .map(|pair| {
                let hi = (pair[0] as char).to_digit(16).ok_or_else(parse_err)?;
                let lo = (pair[1] as char).to_digit(16).ok_or_else(parse_err)?;
                Ok((hi * 16 + lo) as u8)
            })
            .collect::<Result<Vec<u8>>>()?;
        Ok(Object::String(bytes, StringFormat::Hexadecimal))
    }

    fn parse_array(&mut self) -> Result<Object> {
        self.advance(1); // '['
        let mut items = Vec::new();
        loop {
            self.skip_ws_and_comments();
            if self.peek() == Some(b']') {
                self.advance(1);
                break;
            }
            if self.peek().is_none() {
                return Err(parse_err());
            }
            items.push(self.parse_object()?);
        }
        Ok(Object::Array(items))
    }

    fn parse_dict(&mut self) -> Result<Object> {
        self.advance(2); // '<<'
        let mut dict = Dictionary::new();
        loop {
            self.skip_ws_and_comments();
            if self.matches_keyword(b">>") {
                self.advance(2);
                break;
            }
            if self.peek() != Some(b'/') {
                return Err(parse_err());
            }
            let key = match self.parse_name()? {
                Object::Name(name) => name,
                _ => unreachable!(),
            };
            let value = self.parse_object()?;
            dict.set(key, value);
        }
        Ok(Object::Dictionary(dict))
    }
}

fn is_regular(b: u8) -> bool {
    !b.is_ascii_whitespace() && !matches!(b, b'(' | b')' | b'<' | b'>' | b'[' | b']' | b'{' | b'}' | b'/' | b'%')
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_a_simple_indirect_dictionary_object() {
        let parser = BasicParser::new();
        let bytes = b"1 0 obj<</Type/Catalog/Pages 2 0 R>>endobj";
        let (id, object) = parser.parse_indirect_object(bytes, 0).unwrap();
        assert_eq!(id, (1, 0));
        let dict = object.as_dict().unwrap();
        assert_eq!(dict.get_type().unwrap(), b"Catalog");
        assert_eq!(dict.get(b"Pages").unwrap().as_reference().unwrap(), (2, 0));
    }

    #[test]
    fn parses_a_stream_with_direct_length() {
        let parser = BasicParser::new();
        let bytes = b"3 0 obj<</Length 5>>stream\nhello\nendstream endobj";
        let (_, object) = parser.parse_indirect_object(bytes, 0).unwrap();
        let stream = object.as_stream().unwrap();
        assert_eq!(stream.data(), b"hello");
    }

    #[test]
    fn parses_trailer_dictionary() {
        let parser = BasicParser::new();
        let bytes = b"<</Size 12/Root 1 0 R>>";
        let trailer = parser.parse_trailer(bytes, 0).unwrap();
        assert_eq!(trailer.get(b"Size").unwrap().as_i64().unwrap(), 12);
    }

    #[test]
    fn resolves_an_object_stream_member() {
        let parser = BasicParser::new();
        let header = b"6 0"; // one member: object 6 at relative offset 0
        let stream_dict = crate::dictionary! { "Type" => "ObjStm", "N" => 1, "First" => header.len() as i64 };
        let content = format!("{}true", String::from_utf8_lossy(header)).into_bytes();
        let container = Stream::new(stream_dict, content);
        let member = parser.parse_object_stream_member(&container, 0).unwrap();
        assert!(member.as_bool().unwrap());
    }

    #[test]
    fn parses_escaped_and_nested_literal_strings() {
        let parser = BasicParser::new();
        let bytes = b"1 0 obj(a \\(nested\\) \\n string)endobj";
        let (_, object) = parser.parse_indirect_object(bytes, 0).unwrap();
        assert_eq!(object.as_str().unwrap(), b"a (nested) \n string");
    }
}
