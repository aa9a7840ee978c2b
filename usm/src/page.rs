//! The embedded `@UTF` columnar table format.
//!
//! A page table is a sequence of [`Page`]s sharing a name and key order.
//! Columns where every row agrees are stored once (recurring); columns that
//! differ per row are stored once per row in a separate unique-values area.
//! [`get_pages`] and [`pack_pages`] are exact inverses of each other for any
//! well-formed input (see the round-trip tests at the bottom of this file).

use std::collections::HashMap;

use crate::bytes::{
    read_be_f64, read_be_i16, read_be_i32, read_be_i64, read_be_u16, read_be_u32, read_be_u64,
    read_cstring, read_i8, read_le_f32, read_u8, slice, write_be_f64, write_be_u16, write_be_u32,
    write_be_u64, write_le_f32,
};
use crate::error::{Result, UsmError};
use crate::types::{ElementType, Occurrence};

/// A typed scalar/string/bytes value carried by one page column.
#[derive(Debug, Clone, PartialEq)]
pub enum Element {
    I8(i8),
    U8(u8),
    I16(i16),
    U16(u16),
    I32(i32),
    U32(u32),
    I64(i64),
    U64(u64),
    F32(f32),
    F64(f64),
    String(String),
    Bytes(Vec<u8>),
}

impl Element {
    pub fn element_type(&self) -> ElementType {
        match self {
            Element::I8(_) => ElementType::I8,
            Element::U8(_) => ElementType::U8,
            Element::I16(_) => ElementType::I16,
            Element::U16(_) => ElementType::U16,
            Element::I32(_) => ElementType::I32,
            Element::U32(_) => ElementType::U32,
            Element::I64(_) => ElementType::I64,
            Element::U64(_) => ElementType::U64,
            Element::F32(_) => ElementType::F32,
            Element::F64(_) => ElementType::F64,
            Element::String(_) => ElementType::String,
            Element::Bytes(_) => ElementType::Bytes,
        }
    }

    /// Bit-exact equality: floats compare by raw IEEE-754 bits so that the
    /// pack step's recurring-column detection never trips on NaN semantics.
    fn wire_eq(&self, other: &Element) -> bool {
        match (self, other) {
            (Element::F32(a), Element::F32(b)) => a.to_bits() == b.to_bits(),
            (Element::F64(a), Element::F64(b)) => a.to_bits() == b.to_bits(),
            _ => self == other,
        }
    }
}

/// An ordered `key -> Element` mapping. Insertion order is preserved;
/// updating an existing key does not move it.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Page {
    pub name: String,
    order: Vec<String>,
    values: HashMap<String, Element>,
}

impl Page {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            order: Vec::new(),
            values: HashMap::new(),
        }
    }

    /// Inserts or overwrites `key`. Backslashes in a `filename` value are
    /// normalised to forward slashes, matching the reference implementation.
    pub fn update(&mut self, key: impl Into<String>, mut value: Element) {
        let key = key.into();

        if key == "filename" {
            if let Element::String(s) = &value {
                value = Element::String(s.replace('\\', "/"));
            }
        }

        if !self.values.contains_key(&key) {
            self.order.push(key.clone());
        }
        self.values.insert(key, value);
    }

    pub fn get(&self, key: &str) -> Option<&Element> {
        self.values.get(key)
    }

    pub fn key_order(&self) -> &[String] {
        &self.order
    }

    pub fn require(&self, key: &str) -> Result<&Element> {
        self.get(key).ok_or_else(|| {
            UsmError::SchemaViolation(format!("page {:?} is missing key {key:?}", self.name))
        })
    }

    pub fn require_i16(&self, key: &str) -> Result<i16> {
        match self.require(key)? {
            Element::I16(v) => Ok(*v),
            _ => Err(UsmError::SchemaViolation(format!("{key} is not I16"))),
        }
    }

    pub fn require_i32(&self, key: &str) -> Result<i32> {
        match self.require(key)? {
            Element::I32(v) => Ok(*v),
            _ => Err(UsmError::SchemaViolation(format!("{key} is not I32"))),
        }
    }

    pub fn require_u32(&self, key: &str) -> Result<u32> {
        match self.require(key)? {
            Element::U32(v) => Ok(*v),
            _ => Err(UsmError::SchemaViolation(format!("{key} is not U32"))),
        }
    }

    pub fn require_string(&self, key: &str) -> Result<&str> {
        match self.require(key)? {
            Element::String(v) => Ok(v.as_str()),
            _ => Err(UsmError::SchemaViolation(format!("{key} is not STRING"))),
        }
    }
}

fn read_element(
    buf: &[u8],
    pos: usize,
    element_type: ElementType,
    string_array: &[u8],
    byte_array: &[u8],
) -> Result<(Element, usize)> {
    Ok(match element_type {
        ElementType::I8 => (Element::I8(read_i8(buf, pos)?), 1),
        ElementType::U8 => (Element::U8(read_u8(buf, pos)?), 1),
        ElementType::I16 => (Element::I16(read_be_i16(buf, pos)?), 2),
        ElementType::U16 => (Element::U16(read_be_u16(buf, pos)?), 2),
        ElementType::I32 => (Element::I32(read_be_i32(buf, pos)?), 4),
        ElementType::U32 => (Element::U32(read_be_u32(buf, pos)?), 4),
        ElementType::I64 => (Element::I64(read_be_i64(buf, pos)?), 8),
        ElementType::U64 => (Element::U64(read_be_u64(buf, pos)?), 8),
        ElementType::F32 => (Element::F32(read_le_f32(buf, pos)?), 4),
        ElementType::F64 => (Element::F64(read_be_f64(buf, pos)?), 8),
        ElementType::String => {
            let off = read_be_u32(buf, pos)? as usize;
            (Element::String(read_cstring(string_array, off)?), 4)
        }
        ElementType::Bytes => {
            let begin = read_be_u32(buf, pos)? as usize;
            let end = read_be_u32(buf, pos + 4)? as usize;
            (
                Element::Bytes(slice(byte_array, begin, end)?.to_vec()),
                8,
            )
        }
    })
}

struct ColumnDescriptor {
    element_type: ElementType,
    name: String,
}

/// Parses a byte buffer beginning with `@UTF` into its sequence of pages.
pub fn get_pages(info: &[u8]) -> Result<Vec<Page>> {
    if info.len() < 8 || &info[0..4] != b"@UTF" {
        return Err(UsmError::BadSignature {
            context: "expected @UTF page payload".to_string(),
        });
    }

    let payload_size = read_be_u32(info, 4)? as usize;
    let unique_array_offset = read_be_u32(info, 8)? as usize;
    let strings_offset = read_be_u32(info, 12)? as usize;
    let byte_array_offset = read_be_u32(info, 16)? as usize;
    let page_name_offset = read_be_u32(info, 20)? as usize;
    let num_elements_per_page = read_be_u16(info, 24)? as usize;
    let unique_array_size_per_page = read_be_u16(info, 26)? as usize;
    let num_pages = read_be_u32(info, 28)? as usize;

    let string_array = slice(info, 8 + strings_offset, 8 + byte_array_offset)?;
    let byte_array = slice(info, 8 + byte_array_offset, 8 + payload_size)?;
    let page_name = read_cstring(string_array, page_name_offset)?;

    let shared_array = slice(info, 0x20, 8 + unique_array_offset)?;
    let unique_array = slice(
        info,
        8 + unique_array_offset,
        8 + unique_array_offset + unique_array_size_per_page * num_pages,
    )?;

    // Each column's 5-byte descriptor is immediately followed by its inline
    // value when recurring, before the next column's descriptor - shared
    // array and unique array entries are never both separate blocks, they
    // interleave column by column, matching `pack_pages`'s emission order.
    let mut descriptors = Vec::with_capacity(num_elements_per_page);
    let mut recurring_values = Vec::with_capacity(num_elements_per_page);
    let mut shared_pos = 0usize;
    for _ in 0..num_elements_per_page {
        if shared_pos + 5 > shared_array.len() {
            return Err(UsmError::BadChunkGeometry(
                "shared array too short for column descriptor".to_string(),
            ));
        }
        let packed = shared_array[shared_pos];
        let element_type = ElementType::from_u8(packed & 0x1F)?;
        let occurrence = Occurrence::from_u8(packed >> 5)?;
        let name_off = read_be_u32(shared_array, shared_pos + 1)? as usize;
        let name = read_cstring(string_array, name_off)?;
        shared_pos += 5;

        let recurring_value = if occurrence == Occurrence::Recurring {
            let (value, len) =
                read_element(shared_array, shared_pos, element_type, string_array, byte_array)?;
            shared_pos += len;
            Some(value)
        } else {
            None
        };

        descriptors.push(ColumnDescriptor { element_type, name });
        recurring_values.push(recurring_value);
    }

    let mut pages: Vec<Page> = (0..num_pages).map(|_| Page::new(page_name.clone())).collect();

    let mut unique_pos = 0usize;
    for page in pages.iter_mut() {
        for (col, recurring_value) in descriptors.iter().zip(recurring_values.iter()) {
            match recurring_value {
                Some(value) => page.update(col.name.clone(), value.clone()),
                None => {
                    let (value, len) = read_element(
                        unique_array,
                        unique_pos,
                        col.element_type,
                        string_array,
                        byte_array,
                    )?;
                    page.update(col.name.clone(), value);
                    unique_pos += len;
                }
            }
        }
    }

    Ok(pages)
}

fn element_equal(a: &Element, b: &Element) -> bool {
    a.element_type() == b.element_type() && a.wire_eq(b)
}

/// Packs a non-empty sequence of pages sharing a name and key order into an
/// `@UTF` payload. `string_padding` trailing NUL bytes may be appended
/// (some tools use this to align the payload); the reference CLI emits zero.
pub fn pack_pages(pages: &[Page], string_padding: usize) -> Result<Vec<u8>> {
    if pages.is_empty() {
        return Ok(Vec::new());
    }

    let page_name = pages[0].name.clone();
    let order = pages[0].key_order().to_vec();

    for page in pages {
        if page.name != page_name {
            return Err(UsmError::SchemaViolation(
                "pages do not share a name".to_string(),
            ));
        }
        if page.key_order() != order.as_slice() {
            return Err(UsmError::SchemaViolation(
                "pages do not share key order".to_string(),
            ));
        }
    }

    let mut string_array = Vec::new();
    string_array.extend_from_slice(b"<NULL>\0");

    let page_name_offset = string_array.len() as u32;
    string_array.extend_from_slice(page_name.as_bytes());
    string_array.push(0);

    let mut name_offsets = Vec::with_capacity(order.len());
    for key in &order {
        name_offsets.push(string_array.len() as u32);
        string_array.extend_from_slice(key.as_bytes());
        string_array.push(0);
    }

    let mut recurring = vec![false; order.len()];
    if pages.len() > 1 {
        for (i, key) in order.iter().enumerate() {
            let first = pages[0].require(key)?;
            recurring[i] = pages[1..]
                .iter()
                .all(|p| element_equal(first, p.require(key).unwrap()));
        }
    }

    let mut shared_array = Vec::new();
    let mut unique_array = Vec::new();
    let mut byte_array = Vec::new();

    for (pi, page) in pages.iter().enumerate() {
        for (ki, key) in order.iter().enumerate() {
            let el = page.require(key)?;
            let type_byte = el.element_type() as u8;

            if recurring[ki] {
                if pi != 0 {
                    continue;
                }
                shared_array.push(type_byte | ((Occurrence::Recurring as u8) << 5));
                write_be_u32(&mut shared_array, name_offsets[ki]);
                write_element_value(el, &mut shared_array, &mut string_array, &mut byte_array);
            } else {
                if pi == 0 {
                    shared_array.push(type_byte | ((Occurrence::NonRecurring as u8) << 5));
                    write_be_u32(&mut shared_array, name_offsets[ki]);
                }
                write_element_value(el, &mut unique_array, &mut string_array, &mut byte_array);
            }
        }
    }

    string_array.extend(std::iter::repeat_n(0u8, string_padding));

    let mut result = Vec::new();
    result.extend_from_slice(b"@UTF");

    let data_size =
        24 + shared_array.len() + unique_array.len() + string_array.len() + byte_array.len();
    write_be_u32(&mut result, data_size as u32);

    let unique_array_offset = 24 + shared_array.len();
    write_be_u32(&mut result, unique_array_offset as u32);

    let strings_offset = 24 + shared_array.len() + unique_array.len();
    write_be_u32(&mut result, strings_offset as u32);

    let byte_array_offset = 24 + shared_array.len() + unique_array.len() + string_array.len();
    write_be_u32(&mut result, byte_array_offset as u32);

    write_be_u32(&mut result, page_name_offset);
    write_be_u16(&mut result, order.len() as u16);

    if unique_array.len() % pages.len() != 0 {
        return Err(UsmError::BadChunkGeometry(
            "unique array length is not a multiple of the page count".to_string(),
        ));
    }
    let unique_size_per_page = (unique_array.len() / pages.len()) as u16;
    write_be_u16(&mut result, unique_size_per_page);
    write_be_u32(&mut result, pages.len() as u32);

    result.extend_from_slice(&shared_array);
    result.extend_from_slice(&unique_array);
    result.extend_from_slice(&string_array);
    result.extend_from_slice(&byte_array);

    Ok(result)
}

fn write_element_value(
    el: &Element,
    cur: &mut Vec<u8>,
    string_array: &mut Vec<u8>,
    byte_array: &mut Vec<u8>,
) {
    match el {
        Element::I8(v) => cur.push(*v as u8),
        Element::U8(v) => cur.push(*v),
        Element::I16(v) => write_be_u16(cur, *v as u16),
        Element::U16(v) => write_be_u16(cur, *v),
        Element::I32(v) => write_be_u32(cur, *v as u32),
        Element::U32(v) => write_be_u32(cur, *v),
        Element::I64(v) => write_be_u64(cur, *v as u64),
        Element::U64(v) => write_be_u64(cur, *v),
        Element::F32(v) => write_le_f32(cur, *v),
        Element::F64(v) => write_be_f64(cur, *v),
        Element::String(s) => {
            let off = string_array.len() as u32;
            string_array.extend_from_slice(s.as_bytes());
            string_array.push(0);
            write_be_u32(cur, off);
        }
        Element::Bytes(b) => {
            let begin = byte_array.len() as u32;
            let end = begin + b.len() as u32;
            write_be_u32(cur, begin);
            write_be_u32(cur, end);
            byte_array.extend_from_slice(b);
        }
    }
}

/// Reads the `ofs_frmid` (`U32`) column from a sequence of `VIDEO_SEEKINFO`
/// pages into a keyframe index list.
pub fn keyframes_from_seek_pages(seek_pages: Option<&[Page]>) -> Result<Vec<u32>> {
    let Some(seek_pages) = seek_pages else {
        return Ok(Vec::new());
    };

    let mut out = Vec::with_capacity(seek_pages.len());
    for page in seek_pages {
        if page.name != "VIDEO_SEEKINFO" {
            return Err(UsmError::SchemaViolation(format!(
                "expected VIDEO_SEEKINFO page, got {:?}",
                page.name
            )));
        }
        out.push(page.require_u32("ofs_frmid")?);
    }
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn single_page_all_columns_non_recurring() {
        // A lone page can't establish "every row agrees", so every column
        // packs as non-recurring - matching the original tool's output.
        let mut page = Page::new("VIDEO_HDRINFO");
        page.update("width", Element::I32(1920));
        page.update("height", Element::I32(1080));
        page.update("codec_name", Element::String("H264".to_string()));

        let packed = pack_pages(&[page.clone()], 0).unwrap();
        assert_eq!(&packed[0..4], b"@UTF");
        assert_eq!(read_be_u16(&packed, 26).unwrap(), 4 + 4 + 4);

        let parsed = get_pages(&packed).unwrap();
        assert_eq!(parsed.len(), 1);
        assert_eq!(parsed[0], page);
    }

    #[test]
    fn multi_page_matching_column_is_recurring() {
        // Scenario 1: two identical single-column pages pack their shared
        // value once, inline in the shared array, with no unique-array
        // storage at all.
        let mut a = Page::new("T");
        a.update("n", Element::U8(1));
        let mut b = Page::new("T");
        b.update("n", Element::U8(1));

        let packed = pack_pages(&[a.clone(), b.clone()], 0).unwrap();
        assert_eq!(read_be_u16(&packed, 26).unwrap(), 0);
        assert_eq!(read_be_u32(&packed, 28).unwrap(), 2);

        let parsed = get_pages(&packed).unwrap();
        assert_eq!(parsed, vec![a, b]);
    }

    #[test]
    fn interleaved_recurring_columns_parse_in_wire_order() {
        // A recurring column that isn't last: its inline value sits between
        // its own descriptor and the next column's descriptor in the shared
        // array, not after the whole descriptor table.
        let mut a = Page::new("CRIUSF_DIR_STREAM");
        a.update("fileid", Element::U32(0));
        a.update("filename", Element::String("clip.ivf".to_string()));
        a.update("chno", Element::I16(7));

        let mut b = a.clone();
        b.update("filename", Element::String("other.ivf".to_string()));

        let packed = pack_pages(&[a.clone(), b.clone()], 0).unwrap();
        let parsed = get_pages(&packed).unwrap();

        assert_eq!(parsed, vec![a, b]);
    }

    #[test]
    fn two_pages_with_a_differing_column() {
        let mut a = Page::new("VIDEO_SEEKINFO");
        a.update("ofs_frmid", Element::U32(0));
        a.update("resolution", Element::String("same".to_string()));

        let mut b = Page::new("VIDEO_SEEKINFO");
        b.update("ofs_frmid", Element::U32(42));
        b.update("resolution", Element::String("same".to_string()));

        let packed = pack_pages(&[a.clone(), b.clone()], 0).unwrap();
        let parsed = get_pages(&packed).unwrap();

        assert_eq!(parsed.len(), 2);
        assert_eq!(parsed[0], a);
        assert_eq!(parsed[1], b);
        assert_eq!(
            parsed[0].require("resolution").unwrap(),
            parsed[1].require("resolution").unwrap()
        );
    }

    #[test]
    fn bytes_and_float_columns_round_trip() {
        let mut page = Page::new("AHX_HDRINFO");
        page.update("payload", Element::Bytes(vec![1, 2, 3, 4, 5]));
        page.update("gain", Element::F32(1.5));
        page.update("offset", Element::F64(-3.25));

        let packed = pack_pages(&[page.clone()], 0).unwrap();
        let parsed = get_pages(&packed).unwrap();
        assert_eq!(parsed[0], page);
    }

    #[test]
    fn keyframes_are_extracted_in_row_order() {
        let mut a = Page::new("VIDEO_SEEKINFO");
        a.update("ofs_frmid", Element::U32(0));
        let mut b = Page::new("VIDEO_SEEKINFO");
        b.update("ofs_frmid", Element::U32(10));
        let mut c = Page::new("VIDEO_SEEKINFO");
        c.update("ofs_frmid", Element::U32(20));

        let keyframes = keyframes_from_seek_pages(Some(&[a, b, c])).unwrap();
        assert_eq!(keyframes, vec![0, 10, 20]);
    }

    #[test]
    fn keyframes_from_absent_pages_is_empty() {
        assert_eq!(keyframes_from_seek_pages(None).unwrap(), Vec::<u32>::new());
    }

    #[test]
    fn filename_backslashes_are_normalised_on_update() {
        let mut page = Page::new("VIDEO_HDRINFO");
        page.update("filename", Element::String("videos\\movie.usm".to_string()));
        assert_eq!(
            page.get("filename"),
            Some(&Element::String("videos/movie.usm".to_string()))
        );
    }

    #[test]
    fn mismatched_key_order_is_rejected_when_packing() {
        let mut a = Page::new("INFO");
        a.update("x", Element::I32(1));
        a.update("y", Element::I32(2));

        let mut b = Page::new("INFO");
        b.update("y", Element::I32(2));
        b.update("x", Element::I32(1));

        assert!(matches!(
            pack_pages(&[a, b], 0),
            Err(UsmError::SchemaViolation(_))
        ));
    }

    #[test]
    fn empty_page_list_packs_to_empty_bytes() {
        assert_eq!(pack_pages(&[], 0).unwrap(), Vec::<u8>::new());
    }
}
