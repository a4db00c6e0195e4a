use crate::buffer::ChunkBuffer;
use crate::codec::tags::{self, TypeTag};
use crate::value::{Date, Map, Set, Time, Value};
use byteorder::{BigEndian, ByteOrder};
use lazy_static::lazy_static;

#[derive(Debug, Copy, Clone, Eq, PartialEq)]
enum State {
    Closed,
    OpenForWriting,
    OpenForReading,
}

/// One framed unit on the wire. Writing: `open(true)`, any number of
/// `set_value` calls, `close()`, then `get_bytes()` hands out the finished
/// frame. Reading is symmetric: load the wire bytes with `append_bytes`,
/// `open(false)`, then `get_value` per framed value.
pub struct Message {
    buffer: ChunkBuffer,
    state: State,
    read_position: usize,
    written: bool,
}

impl Message {
    #[inline]
    pub fn new() -> Message {
        Message {
            buffer: ChunkBuffer::new(false),
            state: State::Closed,
            read_position: 0,
            written: false,
        }
    }

    /// Start a write or read pass. Opening for writing discards previous
    /// content; opening for reading rewinds to the first frame.
    pub fn open(&mut self, for_writing: bool) {
        if for_writing {
            self.buffer.reset();
            self.written = false;
            self.state = State::OpenForWriting;
        } else {
            self.state = State::OpenForReading;
        }
        self.read_position = 0;
    }

    /// Finish the current pass. A write pass that never produced a value
    /// emits the empty-message envelope.
    pub fn close(&mut self) {
        if self.state == State::OpenForWriting && !self.written {
            self.buffer.append(&[tags::FRAME_START_EMPTY, tags::FRAME_END_EMPTY]);
        }
        self.state = State::Closed;
    }

    #[inline]
    pub fn is_closed(&self) -> bool {
        self.state == State::Closed
    }

    #[inline]
    pub fn get_length(&self) -> usize {
        self.buffer.len()
    }

    /// Load raw wire bytes, e.g. a frame received from a peer.
    pub fn append_bytes(&mut self, data: &[u8]) {
        self.buffer.append(data);
        self.written = true;
    }

    /// The finished frame. Only valid once the message has been closed.
    pub fn get_bytes(&self) -> Vec<u8> {
        if self.state != State::Closed {
            panic!("Message must be closed to extract its bytes");
        }

        self.buffer.to_vec()
    }

    pub fn reset(&mut self) {
        self.buffer.reset();
        self.read_position = 0;
        self.written = false;
        self.state = State::Closed;
    }

    /// Encode one value, wrapped in the start/end envelope carrying its
    /// expected-payload tag.
    pub fn set_value(&mut self, value: &Value) {
        self.write_value(value);
    }

    pub(crate) fn write_value(&mut self, value: &Value) {
        if self.state != State::OpenForWriting {
            panic!("Message is not open for writing");
        }
        if value.is_flaw() {
            panic!("A flaw cannot be written to a message");
        }

        let tag = value.type_tag();

        self.buffer.append_byte(tags::start_byte(tag));
        self.write_payload(value);
        self.buffer.append_byte(tags::end_byte(tag));
        self.written = true;
    }

    /// Decode the next framed value. Returns None when the message holds no
    /// further value (or holds the empty envelope), the value on success,
    /// and a Flaw on any framing or payload error. `allow_closed` permits
    /// reading a message that was loaded but never opened for reading.
    pub fn get_value(&mut self, allow_closed: bool) -> Option<Value> {
        match self.state {
            State::OpenForReading => (),
            State::Closed if allow_closed => (),
            _ => {
                return Some(Value::flaw(
                    "Message is not open for reading or is not closed",
                    self.read_position,
                ));
            }
        }

        let saved_position = self.read_position;
        let start = match self.next_byte() {
            Some(byte) => byte,
            None => return None,
        };

        if start == tags::FRAME_START_EMPTY {
            return match self.next_byte() {
                Some(tags::FRAME_END_EMPTY) => None,
                Some(_) => Some(Value::flaw("Empty Message with incorrect end tag", self.read_position - 1)),
                None => Some(Value::flaw("Truncated message envelope", self.read_position)),
            };
        }

        if (start & !tags::FRAME_TAG_MASK) != (tags::FRAME_START | tags::FRAME_NON_EMPTY) {
            return Some(Value::flaw("Message with incorrect start tag", saved_position));
        }

        let expected = match TypeTag::from_bits(start & tags::FRAME_TAG_MASK) {
            Some(tag) => tag,
            None => return Some(Value::flaw("Message with unknown expected type", saved_position)),
        };

        match self.peek_byte() {
            Some(lead) => {
                if tags::kind_of(lead) != expected {
                    return Some(Value::flaw(
                        "Message with mismatched initial Value tag",
                        self.read_position,
                    ));
                }
            }
            None => return Some(Value::flaw("Truncated message envelope", self.read_position)),
        }

        let value = extract_value(self, None);

        if value.is_flaw() {
            return Some(value);
        }

        match self.next_byte() {
            Some(end) => {
                if (end & !tags::FRAME_TAG_MASK) != (tags::FRAME_END | tags::FRAME_NON_EMPTY) {
                    Some(Value::flaw("Message with incorrect end tag", self.read_position - 1))
                } else if end & tags::FRAME_TAG_MASK != expected as u8 {
                    Some(Value::flaw(
                        "Message with mismatched end Value tag",
                        self.read_position - 1,
                    ))
                } else {
                    Some(value)
                }
            }
            None => Some(Value::flaw("Truncated message envelope", self.read_position)),
        }
    }

    #[inline]
    fn next_byte(&mut self) -> Option<u8> {
        let (byte, at_end) = self.buffer.byte_at(self.read_position);

        if at_end {
            None
        } else {
            self.read_position += 1;
            Some(byte)
        }
    }

    #[inline]
    fn peek_byte(&self) -> Option<u8> {
        let (byte, at_end) = self.buffer.byte_at(self.read_position);

        if at_end {
            None
        } else {
            Some(byte)
        }
    }
}

impl Message {
    fn write_payload(&mut self, value: &Value) {
        match value {
            Value::Logical(flag) => {
                self.buffer
                    .append_byte(if *flag { tags::LOGICAL_TRUE } else { tags::LOGICAL_FALSE });
            }
            Value::Integer(number) => self.write_integer(*number),
            Value::Double(number) => self.write_double_run(&[*number]),
            Value::String(bytes) => self.write_string_or_blob(tags::STRING, bytes),
            Value::Blob(bytes) => self.write_string_or_blob(tags::BLOB, bytes),
            Value::Address(address) => {
                self.buffer.append_byte(tags::ADDRESS);
                self.buffer.append(&address.octets());
            }
            Value::Date(date) => {
                let mut packed = [0u8; 4];

                BigEndian::write_u32(&mut packed, date.packed());
                self.buffer.append_byte(tags::DATE);
                self.buffer.append(&packed);
            }
            Value::Time(time) => {
                let mut packed = [0u8; 4];

                BigEndian::write_u32(&mut packed, time.packed());
                self.buffer.append_byte(tags::TIME);
                self.buffer.append(&packed);
            }
            Value::Array(elements) => self.write_array(elements),
            Value::Map(map) => self.write_map(map),
            Value::Set(set) => self.write_set(set),
            Value::Flaw(_) => panic!("A flaw cannot be written to a message"),
        }
    }

    fn write_integer(&mut self, number: i64) {
        if (-8..=7).contains(&number) {
            self.buffer
                .append_byte(tags::INTEGER | (number as u8 & tags::INTEGER_SHORT_VALUE_MASK));
        } else {
            let bytes = minimal_signed_bytes(number);

            self.buffer
                .append_byte(tags::INTEGER | tags::INTEGER_LONG | (bytes.len() as u8 - 1));
            self.buffer.append(&bytes);
        }
    }

    /// A run of doubles shares one count header; this is what keeps streams
    /// of samples cheap on the wire.
    fn write_double_run(&mut self, values: &[f64]) {
        let count = values.len();

        if count == 0 {
            panic!("A double run must hold at least one value");
        }
        if count <= 16 {
            self.buffer.append_byte(tags::DOUBLE | (count as u8 - 1));
        } else {
            let count_bytes = minimal_unsigned_bytes(count as u64);

            self.buffer
                .append_byte(tags::DOUBLE | tags::DOUBLE_LONG_COUNT | (count_bytes.len() as u8 - 1));
            self.buffer.append(&count_bytes);
        }
        for value in values {
            let mut payload = [0u8; 8];

            BigEndian::write_f64(&mut payload, *value);
            self.buffer.append(&payload);
        }
    }

    fn write_string_or_blob(&mut self, base: u8, bytes: &[u8]) {
        if bytes.len() <= tags::SHORT_LENGTH_MASK as usize {
            self.buffer.append_byte(base | bytes.len() as u8);
        } else {
            let length_bytes = minimal_unsigned_bytes(bytes.len() as u64);

            self.buffer
                .append_byte(base | tags::STRING_OR_BLOB_LONG | (length_bytes.len() as u8 - 1));
            self.buffer.append(&length_bytes);
        }
        self.buffer.append(bytes);
    }

    fn write_container_header(&mut self, base: u8, count: usize) {
        if count <= tags::CONTAINER_COUNT_MASK as usize {
            self.buffer.append_byte(base | count as u8);
        } else {
            let count_bytes = minimal_unsigned_bytes(count as u64);

            self.buffer
                .append_byte(base | tags::CONTAINER_LONG | (count_bytes.len() as u8 - 1));
            self.buffer.append(&count_bytes);
        }
    }

    fn write_array(&mut self, elements: &[Value]) {
        // Runs of consecutive doubles collapse into one wire entry.
        let mut wire_count = 0;
        let mut index = 0;

        while index < elements.len() {
            if matches!(elements[index], Value::Double(_)) {
                while index < elements.len() && matches!(elements[index], Value::Double(_)) {
                    index += 1;
                }
            } else {
                index += 1;
            }
            wire_count += 1;
        }

        self.write_container_header(tags::ARRAY, wire_count);

        let mut index = 0;
        while index < elements.len() {
            if let Value::Double(first) = elements[index] {
                let mut run = vec![first];

                index += 1;
                while index < elements.len() {
                    match elements[index] {
                        Value::Double(next) => {
                            run.push(next);
                            index += 1;
                        }
                        _ => break,
                    }
                }
                self.write_double_run(&run);
            } else {
                self.write_payload(&elements[index]);
                index += 1;
            }
        }
    }

    fn write_map(&mut self, map: &Map) {
        self.write_container_header(tags::MAP, map.len());
        for (key, value) in map.entries() {
            self.write_payload(key);
            self.write_payload(value);
        }
    }

    fn write_set(&mut self, set: &Set) {
        self.write_container_header(tags::SET, set.len());
        for element in set.entries() {
            self.write_payload(element);
        }
    }
}

/// Strip redundant leading bytes from a big-endian two's-complement
/// rendering, keeping the sign intact.
fn minimal_signed_bytes(value: i64) -> Vec<u8> {
    let mut raw = [0u8; 8];
    let mut start = 0;

    BigEndian::write_i64(&mut raw, value);

    while start < 7 {
        let lead = raw[start];
        let next_negative = raw[start + 1] & 0x80 != 0;

        if (lead == 0x00 && !next_negative) || (lead == 0xFF && next_negative) {
            start += 1;
        } else {
            break;
        }
    }

    raw[start..].to_vec()
}

fn minimal_unsigned_bytes(value: u64) -> Vec<u8> {
    let mut raw = [0u8; 8];

    BigEndian::write_u64(&mut raw, value);

    let start = raw.iter().position(|byte| *byte != 0).unwrap_or(7);

    raw[start..].to_vec()
}

type Extractor = fn(&mut Message, u8, Option<&mut Vec<Value>>) -> Value;

lazy_static! {
    /// Lead byte to extractor, one slot per byte value so dispatch is a
    /// single index. Built once from the registered (byte, mask) patterns;
    /// the first registration to claim a slot keeps it.
    static ref EXTRACTORS: [Option<Extractor>; 256] = build_extractor_table();
}

fn register(table: &mut [Option<Extractor>; 256], byte: u8, mask: u8, extractor: Extractor) {
    for candidate in 0..=255u8 {
        if candidate & mask == byte && table[candidate as usize].is_none() {
            table[candidate as usize] = Some(extractor);
        }
    }
}

fn build_extractor_table() -> [Option<Extractor>; 256] {
    let mut table: [Option<Extractor>; 256] = [None; 256];

    register(&mut table, tags::INTEGER, 0xE0, extract_integer);
    register(&mut table, tags::DOUBLE, 0xE0, extract_double);
    register(&mut table, tags::STRING, 0xF8, extract_string);
    register(&mut table, tags::STRING | tags::STRING_OR_BLOB_LONG, 0xF8, extract_string);
    register(&mut table, tags::BLOB, 0xF8, extract_blob);
    register(&mut table, tags::BLOB | tags::STRING_OR_BLOB_LONG, 0xF8, extract_blob);
    register(&mut table, tags::ARRAY, 0xE0, extract_array);
    register(&mut table, tags::MAP, 0xE0, extract_map);
    register(&mut table, tags::SET, 0xE0, extract_set);
    register(&mut table, tags::LOGICAL_FALSE, 0xFE, extract_logical);
    register(&mut table, tags::ADDRESS, 0xFF, extract_address);
    register(&mut table, tags::DATE, 0xFF, extract_date);
    register(&mut table, tags::TIME, 0xFF, extract_time);
    register(&mut table, tags::INVALID, 0xFF, extract_invalid);

    table
}

/// Decode one payload value starting at the current read position. When a
/// parent array is supplied, a packed double run feeds it directly: the
/// first count − 1 doubles are appended here and the last one returned for
/// the caller to append, so the run costs a single pass.
fn extract_value(message: &mut Message, parent: Option<&mut Vec<Value>>) -> Value {
    let position = message.read_position;
    let lead = match message.next_byte() {
        Some(byte) => byte,
        None => return Value::flaw("Unexpected end of message", position),
    };

    match EXTRACTORS[lead as usize] {
        Some(extractor) => extractor(message, lead, parent),
        None => Value::flaw(format!("Unrecognized tag byte 0x{:02X}", lead), position),
    }
}

fn read_unsigned(message: &mut Message, count: usize) -> Option<u64> {
    let mut accumulated: u64 = 0;

    for _ in 0..count {
        accumulated = (accumulated << 8) | u64::from(message.next_byte()?);
    }

    Some(accumulated)
}

fn extract_integer(message: &mut Message, lead: u8, _parent: Option<&mut Vec<Value>>) -> Value {
    if lead & tags::INTEGER_LONG == 0 {
        let nibble = lead & tags::INTEGER_SHORT_VALUE_MASK;
        let value = if nibble & 0x08 != 0 {
            i64::from(nibble) - 16
        } else {
            i64::from(nibble)
        };

        return Value::Integer(value);
    }

    let count = usize::from(lead & tags::INTEGER_LONG_COUNT_MASK) + 1;
    let position = message.read_position;

    if count > 8 {
        return Value::flaw("Integer wider than 8 bytes", position);
    }

    let mut bytes = Vec::with_capacity(count);
    for _ in 0..count {
        match message.next_byte() {
            Some(byte) => bytes.push(byte),
            None => return Value::flaw("Truncated integer payload", message.read_position),
        }
    }

    let mut value = if bytes[0] & 0x80 != 0 { -1i64 } else { 0 };
    for byte in bytes {
        value = (value << 8) | i64::from(byte);
    }

    Value::Integer(value)
}

fn extract_double(message: &mut Message, lead: u8, parent: Option<&mut Vec<Value>>) -> Value {
    let count = if lead & tags::DOUBLE_LONG_COUNT == 0 {
        u64::from(lead & tags::DOUBLE_COUNT_MASK) + 1
    } else {
        let count_bytes = usize::from(lead & tags::DOUBLE_COUNT_MASK) + 1;

        match read_unsigned(message, count_bytes) {
            Some(count) if count > 0 => count,
            Some(_) => return Value::flaw("Double run with zero count", message.read_position),
            None => return Value::flaw("Truncated double count", message.read_position),
        }
    };

    let remaining = (message.get_length() - message.read_position) as u64;

    if count > remaining / 8 {
        return Value::flaw("Truncated double payload", message.read_position);
    }

    let mut values = Vec::with_capacity(count as usize);
    for _ in 0..count {
        let mut payload = [0u8; 8];
        let mut complete = true;

        for slot in payload.iter_mut() {
            match message.next_byte() {
                Some(byte) => *slot = byte,
                None => {
                    complete = false;
                    break;
                }
            }
        }
        if !complete {
            return Value::flaw("Truncated double payload", message.read_position);
        }
        values.push(BigEndian::read_f64(&payload));
    }

    if values.len() == 1 {
        return Value::Double(values[0]);
    }

    match parent {
        Some(parent) => {
            let last = values.pop().expect("Run holds at least two values");

            for value in values {
                parent.push(Value::Double(value));
            }
            Value::Double(last)
        }
        None => Value::Array(values.into_iter().map(Value::Double).collect()),
    }
}

fn extract_string_or_blob(message: &mut Message, lead: u8) -> Result<Vec<u8>, Value> {
    let length = if lead & tags::STRING_OR_BLOB_LONG == 0 {
        u64::from(lead & tags::SHORT_LENGTH_MASK)
    } else {
        let length_bytes = usize::from(lead & tags::SHORT_LENGTH_MASK) + 1;

        match read_unsigned(message, length_bytes) {
            Some(length) => length,
            None => return Err(Value::flaw("Truncated length", message.read_position)),
        }
    };

    let remaining = (message.get_length() - message.read_position) as u64;

    if length > remaining {
        return Err(Value::flaw("Truncated payload", message.read_position));
    }

    let mut bytes = Vec::with_capacity(length as usize);
    for _ in 0..length {
        match message.next_byte() {
            Some(byte) => bytes.push(byte),
            None => return Err(Value::flaw("Truncated payload", message.read_position)),
        }
    }

    Ok(bytes)
}

fn extract_string(message: &mut Message, lead: u8, _parent: Option<&mut Vec<Value>>) -> Value {
    match extract_string_or_blob(message, lead) {
        Ok(bytes) => Value::String(bytes),
        Err(flaw) => flaw,
    }
}

fn extract_blob(message: &mut Message, lead: u8, _parent: Option<&mut Vec<Value>>) -> Value {
    match extract_string_or_blob(message, lead) {
        Ok(bytes) => Value::Blob(bytes),
        Err(flaw) => flaw,
    }
}

fn read_container_count(message: &mut Message, lead: u8) -> Result<u64, Value> {
    if lead & tags::CONTAINER_LONG == 0 {
        Ok(u64::from(lead & tags::CONTAINER_COUNT_MASK))
    } else {
        let count_bytes = usize::from(lead & tags::CONTAINER_COUNT_MASK) + 1;

        read_unsigned(message, count_bytes)
            .ok_or_else(|| Value::flaw("Truncated container count", message.read_position))
    }
}

fn extract_array(message: &mut Message, lead: u8, _parent: Option<&mut Vec<Value>>) -> Value {
    let count = match read_container_count(message, lead) {
        Ok(count) => count,
        Err(flaw) => return flaw,
    };

    let mut elements = Vec::new();
    for _ in 0..count {
        let value = extract_value(message, Some(&mut elements));

        if value.is_flaw() {
            return value;
        }
        elements.push(value);
    }

    Value::Array(elements)
}

fn extract_map(message: &mut Message, lead: u8, _parent: Option<&mut Vec<Value>>) -> Value {
    let count = match read_container_count(message, lead) {
        Ok(count) => count,
        Err(flaw) => return flaw,
    };

    let mut map = Map::new();
    for _ in 0..count {
        let position = message.read_position;
        let key = extract_value(message, None);

        if key.is_flaw() {
            return key;
        }

        let value = extract_value(message, None);

        if value.is_flaw() {
            return value;
        }
        if !map.add_value(key, value) {
            return Value::flaw("Map entry not inserted", position);
        }
    }

    Value::Map(map)
}

fn extract_set(message: &mut Message, lead: u8, _parent: Option<&mut Vec<Value>>) -> Value {
    let count = match read_container_count(message, lead) {
        Ok(count) => count,
        Err(flaw) => return flaw,
    };

    let mut set = Set::new();
    for _ in 0..count {
        let position = message.read_position;
        let element = extract_value(message, None);

        if element.is_flaw() {
            return element;
        }
        if !set.add_value(element) {
            return Value::flaw("Set element not inserted", position);
        }
    }

    Value::Set(set)
}

fn extract_logical(_message: &mut Message, lead: u8, _parent: Option<&mut Vec<Value>>) -> Value {
    Value::Logical(lead == tags::LOGICAL_TRUE)
}

fn extract_address(message: &mut Message, _lead: u8, _parent: Option<&mut Vec<Value>>) -> Value {
    match read_unsigned(message, 4) {
        Some(packed) => Value::Address(std::net::Ipv4Addr::from(packed as u32)),
        None => Value::flaw("Truncated address payload", message.read_position),
    }
}

fn extract_date(message: &mut Message, _lead: u8, _parent: Option<&mut Vec<Value>>) -> Value {
    let position = message.read_position;

    match read_unsigned(message, 4) {
        Some(packed) => match Date::from_packed(packed as u32) {
            Some(date) => Value::Date(date),
            None => Value::flaw("Date out of range", position),
        },
        None => Value::flaw("Truncated date payload", message.read_position),
    }
}

fn extract_time(message: &mut Message, _lead: u8, _parent: Option<&mut Vec<Value>>) -> Value {
    let position = message.read_position;

    match read_unsigned(message, 4) {
        Some(packed) => match Time::from_packed(packed as u32) {
            Some(time) => Value::Time(time),
            None => Value::flaw("Time out of range", position),
        },
        None => Value::flaw("Truncated time payload", message.read_position),
    }
}

fn extract_invalid(message: &mut Message, _lead: u8, _parent: Option<&mut Vec<Value>>) -> Value {
    Value::flaw("Invalid sentinel in message", message.read_position - 1)
}

/// Encode one value into a finished frame.
pub fn encode_value(value: &Value) -> Vec<u8> {
    let mut message = Message::new();

    message.open(true);
    message.set_value(value);
    message.close();
    message.get_bytes()
}

/// Decode the first value of a frame. None for the empty message form.
pub fn decode_frame(bytes: &[u8]) -> Option<Value> {
    let mut message = Message::new();

    message.append_bytes(bytes);
    message.open(false);
    let value = message.get_value(false);
    message.close();

    value
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::net::Ipv4Addr;

    fn roundtrip(value: &Value) -> Value {
        decode_frame(&encode_value(value)).expect("Frame should hold a value")
    }

    #[test]
    fn test_integer_zero_exact_bytes() {
        assert_eq!(encode_value(&Value::Integer(0)), vec![0x1C, 0x00, 0x2C]);
        assert_eq!(decode_frame(&[0x1C, 0x00, 0x2C]), Some(Value::Integer(0)));
    }

    #[test]
    fn test_short_integers_are_one_byte() {
        for number in -8..=7i64 {
            let frame = encode_value(&Value::Integer(number));

            assert_eq!(frame.len(), 3, "envelope plus one payload byte for {}", number);
            assert_eq!(roundtrip(&Value::Integer(number)), Value::Integer(number));
        }
    }

    #[test]
    fn test_long_integer_minimal_width() {
        assert_eq!(encode_value(&Value::Integer(8)), vec![0x1C, 0x10, 0x08, 0x2C]);
        assert_eq!(encode_value(&Value::Integer(-9)), vec![0x1C, 0x10, 0xF7, 0x2C]);
        assert_eq!(encode_value(&Value::Integer(255)), vec![0x1C, 0x11, 0x00, 0xFF, 0x2C]);
        assert_eq!(encode_value(&Value::Integer(-256)), vec![0x1C, 0x11, 0xFF, 0x00, 0x2C]);

        for number in &[127i64, 128, -129, 32767, 65536, i64::MAX, i64::MIN] {
            assert_eq!(roundtrip(&Value::Integer(*number)), Value::Integer(*number));
        }
    }

    #[test]
    fn test_single_double_uses_short_count() {
        let frame = encode_value(&Value::Double(2.5));

        assert_eq!(frame[1], 0x20);
        assert_eq!(frame.len(), 2 + 1 + 8);
        assert_eq!(roundtrip(&Value::Double(2.5)), Value::Double(2.5));
    }

    #[test]
    fn test_double_run_shares_one_header() {
        let elements = vec![Value::Double(1.0), Value::Double(2.0), Value::Double(3.0)];
        let frame = encode_value(&Value::Array(elements.clone()));

        // start, array count 1 (one packed run), run header, 24 payload
        // bytes, end.
        assert_eq!(frame[1], tags::ARRAY | 1);
        assert_eq!(frame[2], tags::DOUBLE | 2);
        assert_eq!(frame.len(), 3 + 3 * 8 + 1);
        assert_eq!(roundtrip(&Value::Array(elements.clone())), Value::Array(elements));
    }

    #[test]
    fn test_long_double_run() {
        let elements: Vec<Value> = (0..20).map(|ii| Value::Double(ii as f64)).collect();

        assert_eq!(roundtrip(&Value::Array(elements.clone())), Value::Array(elements));
    }

    #[test]
    fn test_short_string_in_band_length() {
        assert_eq!(encode_value(&Value::string("")), vec![0x1A, 0x40, 0x2A]);

        let frame = encode_value(&Value::string("hi"));

        assert_eq!(&frame[1..4], &[0x42, b'h', b'i']);

        for length in 0..=7usize {
            let text: String = "x".repeat(length);
            let frame = encode_value(&Value::string(&text));

            assert_eq!(frame.len(), 2 + 1 + length);
        }
    }

    #[test]
    fn test_longer_string_uses_length_byte() {
        let text = "x".repeat(8);
        let frame = encode_value(&Value::string(&text));

        assert_eq!(frame[1], tags::STRING | tags::STRING_OR_BLOB_LONG);
        assert_eq!(frame[2], 8);
        assert_eq!(roundtrip(&Value::string(&text)), Value::string(&text));

        let big = "y".repeat(300);
        let frame = encode_value(&Value::string(&big));

        assert_eq!(frame[1], tags::STRING | tags::STRING_OR_BLOB_LONG | 1);
        assert_eq!(roundtrip(&Value::string(&big)), Value::string(&big));
    }

    #[test]
    fn test_blob_roundtrip() {
        let blob = Value::Blob(vec![0, 1, 2, 253, 254, 255]);
        let frame = encode_value(&blob);

        assert_eq!(frame[1], tags::BLOB | 6);
        assert_eq!(roundtrip(&blob), blob);
    }

    #[test]
    fn test_logical_array_exact_bytes() {
        let value = Value::Array(vec![Value::Logical(true), Value::Logical(false)]);
        let frame = encode_value(&value);

        assert_eq!(
            frame,
            vec![
                tags::start_byte(TypeTag::Container),
                tags::ARRAY | 2,
                tags::LOGICAL_TRUE,
                tags::LOGICAL_FALSE,
                tags::end_byte(TypeTag::Container),
            ]
        );
        assert_eq!(roundtrip(&value), value);
    }

    #[test]
    fn test_other_scalars_roundtrip() {
        let values = vec![
            Value::Logical(true),
            Value::Logical(false),
            Value::Address(Ipv4Addr::new(192, 168, 1, 10)),
            Value::Date(Date::new(2026, 8, 1).unwrap()),
            Value::Time(Time::new(13, 30, 5, 250).unwrap()),
        ];

        for value in values {
            assert_eq!(roundtrip(&value), value);
        }
    }

    #[test]
    fn test_nested_containers_roundtrip() {
        let mut map = Map::new();
        map.add_value(Value::Integer(1), Value::Array(vec![Value::string("one")]));
        map.add_value(Value::Integer(2), Value::Double(2.0));

        let mut set = Set::new();
        set.add_value(Value::Integer(10));
        set.add_value(Value::Integer(-10));

        let value = Value::Array(vec![Value::Map(map), Value::Set(set), Value::Blob(vec![9; 40])]);

        assert_eq!(roundtrip(&value), value);
    }

    #[test]
    fn test_large_container_uses_long_count() {
        let elements: Vec<Value> = (0..300).map(Value::Integer).collect();
        let frame = encode_value(&Value::Array(elements.clone()));

        assert_eq!(frame[1], tags::ARRAY | tags::CONTAINER_LONG | 1);
        assert_eq!(roundtrip(&Value::Array(elements.clone())), Value::Array(elements));
    }

    #[test]
    fn test_random_numbers_roundtrip() {
        use rand::Rng;

        let mut rng = rand::thread_rng();

        for _ in 0..200 {
            let number: i64 = rng.gen();

            assert_eq!(roundtrip(&Value::Integer(number)), Value::Integer(number));
        }
        for _ in 0..200 {
            let number: f64 = rng.gen();

            assert_eq!(roundtrip(&Value::Double(number)), Value::Double(number));
        }
    }

    #[test]
    fn test_empty_message_form() {
        let mut message = Message::new();

        message.open(true);
        message.close();

        assert_eq!(message.get_bytes(), vec![0x10, 0x20]);

        message.open(false);
        assert_eq!(message.get_value(false), None);
    }

    #[test]
    fn test_multiple_values_read_in_sequence() {
        let mut message = Message::new();

        message.open(true);
        message.set_value(&Value::Integer(1));
        message.set_value(&Value::string("two"));
        message.close();

        message.open(false);
        assert_eq!(message.get_value(false), Some(Value::Integer(1)));
        assert_eq!(message.get_value(false), Some(Value::string("two")));
        assert_eq!(message.get_value(false), None);
    }

    #[test]
    fn test_reading_closed_message_needs_permission() {
        let mut message = Message::new();

        message.append_bytes(&[0x1C, 0x00, 0x2C]);

        let denied = message.get_value(false).unwrap();
        match denied {
            Value::Flaw(flaw) => {
                assert_eq!(flaw.description, "Message is not open for reading or is not closed");
            }
            other => panic!("Expected a flaw, got {:?}", other),
        }

        assert_eq!(message.get_value(true), Some(Value::Integer(0)));
    }

    #[test]
    fn test_truncated_envelope_is_a_flaw() {
        // Truncation mid-frame yields a flaw and no partial value.
        let mut message = Message::new();

        message.append_bytes(&[0x1C, 0x00]);
        message.open(false);

        match message.get_value(false).unwrap() {
            Value::Flaw(flaw) => assert_eq!(flaw.description, "Truncated message envelope"),
            other => panic!("Expected a flaw, got {:?}", other),
        }
    }

    #[test]
    fn test_truncated_payload_is_a_flaw() {
        let mut message = Message::new();

        // Long string announcing 4 bytes but carrying 1.
        message.append_bytes(&[0x1A, tags::STRING | tags::STRING_OR_BLOB_LONG, 0x04, b'a', 0x2A]);
        message.open(false);

        let result = message.get_value(false).unwrap();
        assert!(result.is_flaw());
    }

    #[test]
    fn test_mismatched_envelope_tags_are_flaws() {
        // Start byte advertises Integer, payload is a logical.
        let mut message = Message::new();
        message.append_bytes(&[0x1C, tags::LOGICAL_TRUE, 0x2C]);
        message.open(false);
        let result = message.get_value(false).unwrap();
        match result {
            Value::Flaw(flaw) => assert_eq!(flaw.description, "Message with mismatched initial Value tag"),
            other => panic!("Expected a flaw, got {:?}", other),
        }

        // End byte carries a different tag than the start byte.
        let mut message = Message::new();
        message.append_bytes(&[0x1C, 0x00, tags::end_byte(TypeTag::Logical)]);
        message.open(false);
        let result = message.get_value(false).unwrap();
        match result {
            Value::Flaw(flaw) => assert_eq!(flaw.description, "Message with mismatched end Value tag"),
            other => panic!("Expected a flaw, got {:?}", other),
        }

        // End byte is not an end byte at all.
        let mut message = Message::new();
        message.append_bytes(&[0x1C, 0x00, 0x55]);
        message.open(false);
        let result = message.get_value(false).unwrap();
        match result {
            Value::Flaw(flaw) => assert_eq!(flaw.description, "Message with incorrect end tag"),
            other => panic!("Expected a flaw, got {:?}", other),
        }
    }

    #[test]
    fn test_unknown_tag_byte_is_a_flaw_with_position() {
        let mut message = Message::new();

        // 0xC2 sits in the Other major but is not a registered pattern.
        message.append_bytes(&[tags::start_byte(TypeTag::Other), 0xC2, tags::end_byte(TypeTag::Other)]);
        message.open(false);

        match message.get_value(false).unwrap() {
            Value::Flaw(flaw) => {
                assert!(flaw.description.contains("0xC2"));
                assert_eq!(flaw.position, 1);
            }
            other => panic!("Expected a flaw, got {:?}", other),
        }
    }

    #[test]
    fn test_invalid_sentinel_decodes_to_flaw() {
        let mut message = Message::new();

        message.append_bytes(&[tags::start_byte(TypeTag::Other), tags::INVALID, tags::end_byte(TypeTag::Other)]);
        message.open(false);

        assert!(message.get_value(false).unwrap().is_flaw());
    }

    #[test]
    fn test_map_with_duplicate_keys_is_a_flaw() {
        let mut message = Message::new();

        message.append_bytes(&[
            tags::start_byte(TypeTag::Container),
            tags::MAP | 2,
            0x01,
            0x01,
            0x01,
            0x02,
            tags::end_byte(TypeTag::Container),
        ]);
        message.open(false);

        assert!(message.get_value(false).unwrap().is_flaw());
    }

    #[test]
    fn test_wide_integer_rejected() {
        let mut message = Message::new();

        // Announces a 13-byte integer.
        let mut frame = vec![0x1C, tags::INTEGER_LONG | 0x0C];
        frame.extend_from_slice(&[0x01; 13]);
        frame.push(0x2C);
        message.append_bytes(&frame);
        message.open(false);

        assert!(message.get_value(false).unwrap().is_flaw());
    }
}
