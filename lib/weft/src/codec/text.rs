use crate::buffer::ChunkBuffer;
use crate::value::{Date, Map, Set, Time, Value};
use lazy_static::lazy_static;
use std::net::Ipv4Addr;

const SINGLE_QUOTE: u8 = b'\'';
const DOUBLE_QUOTE: u8 = b'"';
const ESCAPE_CHAR: u8 = b'\\';
const BLOB_SEPARATOR: u8 = b'%';
const HEX_DIGITS: &[u8; 16] = b"0123456789abcdef";

/// Canonical names for the 32 control codes: the common ones get their
/// single-letter escape, the rest the caret form.
fn control_name(code: u8) -> String {
    match code {
        0x07 => "a".to_string(),
        0x08 => "b".to_string(),
        0x09 => "t".to_string(),
        0x0A => "n".to_string(),
        0x0B => "v".to_string(),
        0x0C => "f".to_string(),
        0x0D => "r".to_string(),
        0x1B => "e".to_string(),
        _ => format!("C-{}", (code + 0x40) as char),
    }
}

/// Accumulates the readable textual form of values and parses it back. The
/// backing store reserves a terminator slot so the content is always
/// consumable as a C string.
pub struct StringBuffer {
    buffer: ChunkBuffer,
}

impl StringBuffer {
    #[inline]
    pub fn new() -> StringBuffer {
        StringBuffer {
            buffer: ChunkBuffer::new(true),
        }
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.buffer.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.buffer.is_empty()
    }

    #[inline]
    pub fn reset(&mut self) {
        self.buffer.reset();
    }

    #[inline]
    pub fn add_text(&mut self, text: &str) {
        self.buffer.append(text.as_bytes());
    }

    #[inline]
    pub fn add_byte(&mut self, byte: u8) {
        self.buffer.append_byte(byte);
    }

    pub fn add_logical(&mut self, flag: bool) {
        self.add_text(if flag { "true" } else { "false" });
    }

    pub fn add_integer(&mut self, number: i64) {
        self.add_text(&number.to_string());
    }

    pub fn add_double(&mut self, number: f64) {
        let rendered = number.to_string();

        self.add_text(&rendered);
        // Keep the double readable as a double: a fractionless rendering
        // would otherwise parse back as an integer.
        if number.is_finite() && !rendered.contains('.') && !rendered.contains('e') && !rendered.contains('E') {
            self.add_text(".0");
        }
    }

    pub fn add_address(&mut self, address: Ipv4Addr) {
        let octets = address.octets();

        self.add_text(&format!("@{}.{}.{}.{}", octets[0], octets[1], octets[2], octets[3]));
    }

    pub fn add_date(&mut self, date: Date) {
        self.add_text(&format!("^{}/{}/{}", date.year(), date.month(), date.day()));
    }

    pub fn add_time(&mut self, time: Time) {
        self.add_text(&format!(
            "^{}:{:02}:{:02}.{:03}",
            time.hour(),
            time.minute(),
            time.second(),
            time.millisecond()
        ));
    }

    /// Blob form: `%<decimal-length>%<hex-pairs>%`.
    pub fn add_bytes_block(&mut self, bytes: &[u8]) {
        self.add_byte(BLOB_SEPARATOR);
        self.add_text(&bytes.len().to_string());
        self.add_byte(BLOB_SEPARATOR);
        for byte in bytes {
            self.add_byte(HEX_DIGITS[usize::from(byte >> 4)]);
            self.add_byte(HEX_DIGITS[usize::from(byte & 0x0F)]);
        }
        self.add_byte(BLOB_SEPARATOR);
    }

    /// Quote and escape arbitrary bytes, choosing the quote character that
    /// needs the fewest escapes.
    pub fn add_quoted(&mut self, bytes: &[u8]) {
        let mut has_specials = false;
        let mut single_quotes = 0usize;
        let mut double_quotes = 0usize;
        let mut escapes = 0usize;

        for byte in bytes {
            if *byte < 0x20 || *byte & 0x80 != 0 {
                has_specials = true;
            } else if *byte == SINGLE_QUOTE {
                single_quotes += 1;
            } else if *byte == DOUBLE_QUOTE {
                double_quotes += 1;
            } else if *byte == ESCAPE_CHAR {
                escapes += 1;
            }
        }

        if !has_specials && single_quotes + double_quotes + escapes == 0 {
            self.add_byte(DOUBLE_QUOTE);
            self.buffer.append(bytes);
            self.add_byte(DOUBLE_QUOTE);
            return;
        }

        let delimiter = if double_quotes > single_quotes {
            SINGLE_QUOTE
        } else {
            DOUBLE_QUOTE
        };

        self.add_byte(delimiter);
        for byte in bytes {
            let byte = *byte;

            if byte < 0x20 {
                self.add_byte(ESCAPE_CHAR);
                self.add_text(&control_name(byte));
            } else if byte & 0x80 != 0 {
                self.add_byte(ESCAPE_CHAR);
                let stripped = byte & 0x7F;

                if stripped == b' ' {
                    // Meta-blank is very special
                    self.add_text("240");
                } else if stripped == 0x7F {
                    // As is meta-DEL
                    self.add_text("377");
                } else if stripped == delimiter {
                    self.add_text(if delimiter == SINGLE_QUOTE { "247" } else { "242" });
                } else {
                    self.add_text("M-");
                    if stripped < 0x20 {
                        self.add_byte(ESCAPE_CHAR);
                        self.add_text(&control_name(stripped));
                    } else if stripped == ESCAPE_CHAR {
                        // Meta-backslash must not read as the start of a
                        // nested escape.
                        self.add_byte(ESCAPE_CHAR);
                        self.add_byte(stripped);
                    } else {
                        self.add_byte(stripped);
                    }
                }
            } else {
                if byte == delimiter || byte == ESCAPE_CHAR {
                    self.add_byte(ESCAPE_CHAR);
                }
                self.add_byte(byte);
            }
        }
        self.add_byte(delimiter);
    }

    pub fn to_bytes(&self) -> Vec<u8> {
        self.buffer.to_vec()
    }

    pub fn to_text(&mut self) -> String {
        String::from_utf8_lossy(self.buffer.to_contiguous()).into_owned()
    }

    /// Parse the first value held in the buffer.
    pub fn convert_to_value(&mut self) -> Value {
        let content = self.buffer.to_contiguous();
        let mut reader = TextReader::new(content);

        read_value(&mut reader)
    }

    /// Parse every top-level value, stopping at the first flaw (which is
    /// included as the final element).
    pub fn convert_to_values(&mut self) -> Vec<Value> {
        let content = self.buffer.to_contiguous();
        let mut reader = TextReader::new(content);
        let mut values = Vec::new();

        loop {
            reader.skip_blank();
            if reader.peek().is_none() {
                return values;
            }

            let value = read_value(&mut reader);
            let failed = value.is_flaw();

            values.push(value);
            if failed {
                return values;
            }
        }
    }
}

/// Serialize a value into its readable form. Squished output drops the
/// optional padding inside containers.
pub fn print_value(value: &Value, buffer: &mut StringBuffer, squished: bool) {
    match value {
        Value::Logical(flag) => buffer.add_logical(*flag),
        Value::Integer(number) => buffer.add_integer(*number),
        Value::Double(number) => buffer.add_double(*number),
        Value::String(bytes) => buffer.add_quoted(bytes),
        Value::Blob(bytes) => buffer.add_bytes_block(bytes),
        Value::Address(address) => buffer.add_address(*address),
        Value::Date(date) => buffer.add_date(*date),
        Value::Time(time) => buffer.add_time(*time),
        Value::Array(elements) => {
            buffer.add_byte(b'(');
            if !squished {
                buffer.add_byte(b' ');
            }
            for (index, element) in elements.iter().enumerate() {
                if index > 0 {
                    buffer.add_byte(b' ');
                }
                print_value(element, buffer, squished);
            }
            if !squished && !elements.is_empty() {
                buffer.add_byte(b' ');
            }
            buffer.add_byte(b')');
        }
        Value::Map(map) => {
            buffer.add_byte(b'{');
            if !squished {
                buffer.add_byte(b' ');
            }
            for (index, (key, entry)) in map.entries().iter().enumerate() {
                if index > 0 {
                    buffer.add_byte(b' ');
                }
                print_value(key, buffer, squished);
                buffer.add_text(if squished { "->" } else { " -> " });
                print_value(entry, buffer, squished);
            }
            if !squished && !map.is_empty() {
                buffer.add_byte(b' ');
            }
            buffer.add_byte(b'}');
        }
        Value::Set(set) => {
            buffer.add_byte(b'[');
            if !squished {
                buffer.add_byte(b' ');
            }
            for (index, element) in set.entries().iter().enumerate() {
                if index > 0 {
                    buffer.add_byte(b' ');
                }
                print_value(element, buffer, squished);
            }
            if !squished && !set.is_empty() {
                buffer.add_byte(b' ');
            }
            buffer.add_byte(b']');
        }
        Value::Flaw(flaw) => {
            buffer.add_text("<flaw: ");
            buffer.add_text(&flaw.description);
            buffer.add_byte(b'>');
        }
    }
}

fn json_escape_into(bytes: &[u8], buffer: &mut StringBuffer) {
    buffer.add_byte(b'"');
    for byte in bytes {
        match byte {
            b'"' => buffer.add_text("\\\""),
            b'\\' => buffer.add_text("\\\\"),
            0x08 => buffer.add_text("\\b"),
            0x09 => buffer.add_text("\\t"),
            0x0A => buffer.add_text("\\n"),
            0x0C => buffer.add_text("\\f"),
            0x0D => buffer.add_text("\\r"),
            byte if *byte < 0x20 || *byte & 0x80 != 0 => {
                buffer.add_text(&format!("\\u{:04x}", byte));
            }
            byte => buffer.add_byte(*byte),
        }
    }
    buffer.add_byte(b'"');
}

/// Serialize a value as JSON. `as_key` forces a scalar into a quoted string
/// for object-key position; kinds JSON has no spelling for (addresses,
/// dates, times) render as their textual form inside a string.
pub fn print_value_json(value: &Value, buffer: &mut StringBuffer, as_key: bool, squished: bool) {
    match value {
        Value::Logical(flag) => {
            if as_key {
                buffer.add_byte(b'"');
                buffer.add_logical(*flag);
                buffer.add_byte(b'"');
            } else {
                buffer.add_logical(*flag);
            }
        }
        Value::Integer(number) => {
            if as_key {
                buffer.add_byte(b'"');
                buffer.add_integer(*number);
                buffer.add_byte(b'"');
            } else {
                buffer.add_integer(*number);
            }
        }
        Value::Double(number) => {
            if number.is_finite() {
                buffer.add_double(*number);
            } else {
                buffer.add_text("null");
            }
        }
        Value::String(bytes) => json_escape_into(bytes, buffer),
        Value::Blob(bytes) => {
            buffer.add_byte(b'[');
            for (index, byte) in bytes.iter().enumerate() {
                if index > 0 {
                    buffer.add_byte(b',');
                    if !squished {
                        buffer.add_byte(b' ');
                    }
                }
                buffer.add_integer(i64::from(*byte));
            }
            buffer.add_byte(b']');
        }
        Value::Address(_) | Value::Date(_) | Value::Time(_) => {
            buffer.add_byte(b'"');
            print_value(value, buffer, true);
            buffer.add_byte(b'"');
        }
        Value::Array(elements) => {
            buffer.add_byte(b'[');
            for (index, element) in elements.iter().enumerate() {
                if index > 0 {
                    buffer.add_byte(b',');
                    if !squished {
                        buffer.add_byte(b' ');
                    }
                }
                print_value_json(element, buffer, false, squished);
            }
            buffer.add_byte(b']');
        }
        Value::Map(map) => {
            buffer.add_byte(b'{');
            for (index, (key, entry)) in map.entries().iter().enumerate() {
                if index > 0 {
                    buffer.add_byte(b',');
                    if !squished {
                        buffer.add_byte(b' ');
                    }
                }
                print_value_json(key, buffer, true, squished);
                buffer.add_byte(b':');
                if !squished {
                    buffer.add_byte(b' ');
                }
                print_value_json(entry, buffer, false, squished);
            }
            buffer.add_byte(b'}');
        }
        Value::Set(set) => {
            buffer.add_byte(b'[');
            for (index, element) in set.entries().iter().enumerate() {
                if index > 0 {
                    buffer.add_byte(b',');
                    if !squished {
                        buffer.add_byte(b' ');
                    }
                }
                print_value_json(element, buffer, false, squished);
            }
            buffer.add_byte(b']');
        }
        Value::Flaw(_) => buffer.add_text("null"),
    }
}

struct TextReader<'a> {
    data: &'a [u8],
    position: usize,
}

impl<'a> TextReader<'a> {
    fn new(data: &'a [u8]) -> TextReader<'a> {
        TextReader { data, position: 0 }
    }

    #[inline]
    fn peek(&self) -> Option<u8> {
        self.data.get(self.position).copied()
    }

    #[inline]
    fn peek_at(&self, offset: usize) -> Option<u8> {
        self.data.get(self.position + offset).copied()
    }

    #[inline]
    fn next(&mut self) -> Option<u8> {
        let byte = self.peek()?;

        self.position += 1;
        Some(byte)
    }

    /// Skip whitespace and `//`-to-end-of-line comments.
    fn skip_blank(&mut self) {
        loop {
            match self.peek() {
                Some(byte) if byte.is_ascii_whitespace() => {
                    self.position += 1;
                }
                Some(b'/') if self.peek_at(1) == Some(b'/') => {
                    while let Some(byte) = self.next() {
                        if byte == b'\n' {
                            break;
                        }
                    }
                }
                _ => return,
            }
        }
    }

    /// Shared by every primitive reader: a primitive must be followed by
    /// end of input, whitespace, the comment opener, a container closer, or
    /// the map arrow, so `trueX` is rejected while `true)` is accepted.
    fn at_legal_terminator(&self) -> bool {
        match self.peek() {
            None => true,
            Some(byte) => {
                byte.is_ascii_whitespace()
                    || byte == b'/'
                    || byte == b')'
                    || byte == b']'
                    || byte == b'}'
                    || byte == b'-'
            }
        }
    }

    fn flaw<S: Into<String>>(&self, description: S) -> Value {
        Value::flaw(description, self.position)
    }
}

type ReaderFn = fn(&mut TextReader) -> Value;

lazy_static! {
    /// First significant character to reader, mirroring the extractor table
    /// of the binary codec. Initialized once; read-only afterwards.
    static ref READERS: [Option<ReaderFn>; 256] = build_reader_table();
}

fn register_reader(table: &mut [Option<ReaderFn>; 256], initial_characters: &str, reader: ReaderFn) {
    for character in initial_characters.bytes() {
        table[character as usize] = Some(reader);
    }
}

fn build_reader_table() -> [Option<ReaderFn>; 256] {
    let mut table: [Option<ReaderFn>; 256] = [None; 256];

    register_reader(&mut table, "@", read_address);
    register_reader(&mut table, "^", read_date_or_time);
    register_reader(&mut table, "tTfF", read_logical);
    register_reader(&mut table, "+-.0123456789", read_number);
    register_reader(&mut table, "\"'", read_string);
    register_reader(&mut table, "%", read_blob);
    register_reader(&mut table, "(", read_array);
    register_reader(&mut table, "{", read_map);
    register_reader(&mut table, "[", read_set);

    table
}

fn read_value(reader: &mut TextReader) -> Value {
    reader.skip_blank();

    let lead = match reader.peek() {
        Some(byte) => byte,
        None => return reader.flaw("Unexpected end of text"),
    };

    match READERS[lead as usize] {
        Some(read) => read(reader),
        None => reader.flaw(format!("Unrecognized initial character '{}'", lead as char)),
    }
}

/// Parse a standalone piece of text into its first value.
pub fn parse_text(text: &str) -> Value {
    let mut reader = TextReader::new(text.as_bytes());

    read_value(&mut reader)
}

fn read_logical(reader: &mut TextReader) -> Value {
    let flag = match reader.peek() {
        Some(b't') | Some(b'T') => true,
        _ => false,
    };
    let expected: &[u8] = if flag { b"true" } else { b"false" };

    for wanted in expected {
        match reader.next() {
            Some(byte) if byte.eq_ignore_ascii_case(wanted) => (),
            _ => return reader.flaw("Malformed logical value"),
        }
    }
    if !reader.at_legal_terminator() {
        return reader.flaw("Logical value not properly terminated");
    }

    Value::Logical(flag)
}

fn read_number(reader: &mut TextReader) -> Value {
    let start = reader.position;
    let mut is_double = false;

    if matches!(reader.peek(), Some(b'+') | Some(b'-')) {
        reader.position += 1;
    }
    while matches!(reader.peek(), Some(byte) if byte.is_ascii_digit()) {
        reader.position += 1;
    }
    if reader.peek() == Some(b'.') {
        is_double = true;
        reader.position += 1;
        while matches!(reader.peek(), Some(byte) if byte.is_ascii_digit()) {
            reader.position += 1;
        }
    }
    if matches!(reader.peek(), Some(b'e') | Some(b'E')) {
        is_double = true;
        reader.position += 1;
        if matches!(reader.peek(), Some(b'+') | Some(b'-')) {
            reader.position += 1;
        }
        while matches!(reader.peek(), Some(byte) if byte.is_ascii_digit()) {
            reader.position += 1;
        }
    }
    if !reader.at_legal_terminator() {
        return reader.flaw("Number not properly terminated");
    }

    let text = std::str::from_utf8(&reader.data[start..reader.position]).expect("Number text is ASCII");

    if is_double {
        match text.parse::<f64>() {
            Ok(number) => Value::Double(number),
            Err(_) => reader.flaw("Malformed floating-point number"),
        }
    } else {
        match text.parse::<i64>() {
            Ok(number) => Value::Integer(number),
            Err(_) => reader.flaw("Malformed integer"),
        }
    }
}

fn read_string(reader: &mut TextReader) -> Value {
    let delimiter = reader.next().expect("Dispatch guaranteed a quote");
    let mut bytes = Vec::new();

    loop {
        let byte = match reader.next() {
            Some(byte) => byte,
            None => return reader.flaw("Unterminated string"),
        };

        if byte == delimiter {
            return Value::String(bytes);
        }
        if byte != ESCAPE_CHAR {
            bytes.push(byte);
            continue;
        }

        match read_escape(reader) {
            Ok(byte) => bytes.push(byte),
            Err(flaw) => return flaw,
        }
    }
}

/// One escape sequence, after the backslash has been consumed.
fn read_escape(reader: &mut TextReader) -> Result<u8, Value> {
    let lead = match reader.next() {
        Some(byte) => byte,
        None => return Err(reader.flaw("Unterminated escape sequence")),
    };

    match lead {
        b'a' => Ok(0x07),
        b'b' => Ok(0x08),
        b't' => Ok(0x09),
        b'n' => Ok(0x0A),
        b'v' => Ok(0x0B),
        b'f' => Ok(0x0C),
        b'r' => Ok(0x0D),
        b'e' => Ok(0x1B),
        b'C' => {
            if reader.next() != Some(b'-') {
                return Err(reader.flaw("Malformed control escape"));
            }
            match reader.next() {
                Some(byte) if (0x40..0x60).contains(&byte) => Ok(byte - 0x40),
                _ => Err(reader.flaw("Malformed control escape")),
            }
        }
        b'M' => {
            if reader.next() != Some(b'-') {
                return Err(reader.flaw("Malformed meta escape"));
            }
            match reader.peek() {
                Some(ESCAPE_CHAR) => {
                    reader.position += 1;
                    read_escape(reader).map(|byte| byte | 0x80)
                }
                Some(byte) => {
                    reader.position += 1;
                    Ok(byte | 0x80)
                }
                None => Err(reader.flaw("Unterminated meta escape")),
            }
        }
        byte if byte.is_ascii_digit() => {
            // Up to three octal digits: \240 meta-blank, \377 meta-DEL and
            // the meta-quotes land here.
            let mut accumulated = u32::from(byte - b'0');

            for _ in 0..2 {
                match reader.peek() {
                    Some(digit) if (b'0'..b'8').contains(&digit) => {
                        accumulated = accumulated * 8 + u32::from(digit - b'0');
                        reader.position += 1;
                    }
                    _ => break,
                }
            }
            if accumulated > 0xFF {
                Err(reader.flaw("Octal escape out of range"))
            } else {
                Ok(accumulated as u8)
            }
        }
        byte => Ok(byte),
    }
}

fn read_unsigned_int(reader: &mut TextReader) -> Option<u64> {
    let start = reader.position;
    let mut accumulated: u64 = 0;

    while let Some(byte) = reader.peek() {
        if !byte.is_ascii_digit() {
            break;
        }
        accumulated = accumulated.checked_mul(10)?.checked_add(u64::from(byte - b'0'))?;
        reader.position += 1;
    }

    if reader.position == start {
        None
    } else {
        Some(accumulated)
    }
}

fn read_address(reader: &mut TextReader) -> Value {
    reader.next();

    let mut octets = [0u8; 4];

    for (index, octet) in octets.iter_mut().enumerate() {
        if index > 0 {
            if reader.next() != Some(b'.') {
                return reader.flaw("Malformed address");
            }
        }
        match read_unsigned_int(reader) {
            Some(byte) if byte <= 255 => *octet = byte as u8,
            _ => return reader.flaw("Address byte out of range"),
        }
    }
    if !reader.at_legal_terminator() {
        return reader.flaw("Address not properly terminated");
    }

    Value::Address(Ipv4Addr::from(octets))
}

fn read_date_or_time(reader: &mut TextReader) -> Value {
    reader.next();

    let first = match read_unsigned_int(reader) {
        Some(value) => value,
        None => return reader.flaw("Malformed date or time"),
    };

    match reader.peek() {
        Some(b'/') => {
            reader.position += 1;
            let month = read_unsigned_int(reader);
            if reader.next() != Some(b'/') {
                return reader.flaw("Malformed date");
            }
            let day = read_unsigned_int(reader);

            if !reader.at_legal_terminator() {
                return reader.flaw("Date not properly terminated");
            }
            match (month, day) {
                (Some(month), Some(day)) => {
                    match Date::new(first as u32, month as u32, day as u32) {
                        Some(date) => Value::Date(date),
                        None => reader.flaw("Date out of range"),
                    }
                }
                _ => reader.flaw("Malformed date"),
            }
        }
        Some(b':') => {
            reader.position += 1;
            let minute = read_unsigned_int(reader);
            if reader.next() != Some(b':') {
                return reader.flaw("Malformed time");
            }
            let second = read_unsigned_int(reader);
            let millisecond = if reader.peek() == Some(b'.') {
                reader.position += 1;
                read_unsigned_int(reader)
            } else {
                Some(0)
            };

            if !reader.at_legal_terminator() {
                return reader.flaw("Time not properly terminated");
            }
            match (minute, second, millisecond) {
                (Some(minute), Some(second), Some(millisecond)) => {
                    match Time::new(first as u32, minute as u32, second as u32, millisecond as u32) {
                        Some(time) => Value::Time(time),
                        None => reader.flaw("Time out of range"),
                    }
                }
                _ => reader.flaw("Malformed time"),
            }
        }
        _ => reader.flaw("Malformed date or time"),
    }
}

fn hex_value(byte: u8) -> Option<u8> {
    match byte {
        b'0'..=b'9' => Some(byte - b'0'),
        b'a'..=b'f' => Some(byte - b'a' + 10),
        b'A'..=b'F' => Some(byte - b'A' + 10),
        _ => None,
    }
}

fn read_blob(reader: &mut TextReader) -> Value {
    reader.next();

    let length = match read_unsigned_int(reader) {
        Some(length) => length,
        None => return reader.flaw("Malformed blob length"),
    };

    if reader.next() != Some(BLOB_SEPARATOR) {
        return reader.flaw("Malformed blob");
    }

    let mut bytes = Vec::with_capacity(length as usize);
    for _ in 0..length {
        let high = reader.next().and_then(hex_value);
        let low = reader.next().and_then(hex_value);

        match (high, low) {
            (Some(high), Some(low)) => bytes.push((high << 4) | low),
            _ => return reader.flaw("Malformed blob byte"),
        }
    }

    if reader.next() != Some(BLOB_SEPARATOR) {
        return reader.flaw("Blob not properly terminated");
    }
    if !reader.at_legal_terminator() {
        return reader.flaw("Blob not properly terminated");
    }

    Value::Blob(bytes)
}

fn read_array(reader: &mut TextReader) -> Value {
    reader.next();

    let mut elements = Vec::new();

    loop {
        reader.skip_blank();
        match reader.peek() {
            Some(b')') => {
                reader.position += 1;
                return Value::Array(elements);
            }
            Some(_) => {
                let value = read_value(reader);

                if value.is_flaw() {
                    return value;
                }
                elements.push(value);
            }
            None => return reader.flaw("Unterminated array"),
        }
    }
}

fn read_map(reader: &mut TextReader) -> Value {
    reader.next();

    let mut map = Map::new();

    loop {
        reader.skip_blank();
        match reader.peek() {
            Some(b'}') => {
                reader.position += 1;
                return Value::Map(map);
            }
            Some(_) => {
                let entry_position = reader.position;
                let key = read_value(reader);

                if key.is_flaw() {
                    return key;
                }

                reader.skip_blank();
                if reader.next() != Some(b'-') || reader.next() != Some(b'>') {
                    return reader.flaw("Expected '->' between map key and value");
                }

                let value = read_value(reader);

                if value.is_flaw() {
                    return value;
                }
                if !map.add_value(key, value) {
                    return Value::flaw("Map entry not inserted", entry_position);
                }
            }
            None => return reader.flaw("Unterminated map"),
        }
    }
}

fn read_set(reader: &mut TextReader) -> Value {
    reader.next();

    let mut set = Set::new();

    loop {
        reader.skip_blank();
        match reader.peek() {
            Some(b']') => {
                reader.position += 1;
                return Value::Set(set);
            }
            Some(_) => {
                let element_position = reader.position;
                let element = read_value(reader);

                if element.is_flaw() {
                    return element;
                }
                if !set.add_value(element) {
                    return Value::flaw("Set element not inserted", element_position);
                }
            }
            None => return reader.flaw("Unterminated set"),
        }
    }
}
