//! ISO BMFF box model (ISO/IEC 14496-12).
//!
//! A box is an ordered list of named elements, much like a C struct. The
//! layout of every supported box type lives in a static table ([`spec`]):
//! header kind, parent, cardinality and the body elements with their
//! defaults. Boxes that hold other boxes append them after their body.
//!
//! ```text
//! ┌──────────┬──────────┬─────────┬─────────┬────────────────┬──────────────┐
//! │ size u32 │ type 4cc │ version │ flags   │ body elements  │ child boxes  │
//! │          │          │ (FullBox only)    │                │ (containers) │
//! └──────────┴──────────┴─────────┴─────────┴────────────────┴──────────────┘
//! ```
//!
//! All integers are big-endian. The `size` element is never cached: it is
//! computed from the current content whenever it is read or encoded.

use std::fmt::{self, Write as _};

use bytes::{BufMut, Bytes, BytesMut};

use crate::error::{ParseErrorKind, Result, RtspError};

/// Box header layout.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Header {
    /// No header at all, only used by the `file` pseudo box.
    None,
    /// 32-bit size and four character type.
    Box,
    /// [`Header::Box`] followed by an 8-bit version and 24-bit flags.
    FullBox { version: u8, flags: u32 },
}

impl Header {
    pub fn byte_length(self) -> usize {
        match self {
            Header::None => 0,
            Header::Box => 8,
            Header::FullBox { .. } => 12,
        }
    }
}

/// How many boxes of a type may appear in their parent.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Quantity {
    One,
    ZeroOrOne,
    OneOrMore,
    Any,
}

/// Initial value of a body element in the box table.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Init {
    /// Zero-filled reserved region of a fixed width.
    Reserved(usize),
    Chars(&'static str),
    U8(u8),
    U16(u16),
    U24(u32),
    U32(u32),
    U64(u64),
    U8Array(&'static [u8]),
    U16Array(&'static [u16]),
    U32Array(&'static [u32]),
    /// Count byte OR-ed with the mask, then `(u16 length, bytes)` pairs.
    ParameterSets { mask: u8 },
}

/// One `(name, kind, default)` body entry.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct FieldSpec {
    pub name: &'static str,
    pub init: Init,
}

const fn field(name: &'static str, init: Init) -> FieldSpec {
    FieldSpec { name, init }
}

/// Static description of one box type.
#[derive(Debug, PartialEq)]
pub struct BoxSpec {
    /// Type of the enclosing box, `file` for top level boxes.
    pub parent: &'static str,
    pub mandatory: bool,
    pub quantity: Quantity,
    pub header: Header,
    pub body: &'static [FieldSpec],
    /// Whether child boxes follow the body.
    pub container: bool,
}

const UNITY_MATRIX: [u32; 9] = [0x0001_0000, 0, 0, 0, 0x0001_0000, 0, 0, 0, 0x4000_0000];

const fn leaf(
    parent: &'static str,
    mandatory: bool,
    quantity: Quantity,
    header: Header,
    body: &'static [FieldSpec],
) -> BoxSpec {
    BoxSpec {
        parent,
        mandatory,
        quantity,
        header,
        body,
        container: false,
    }
}

const fn holder(
    parent: &'static str,
    mandatory: bool,
    quantity: Quantity,
    header: Header,
    body: &'static [FieldSpec],
) -> BoxSpec {
    BoxSpec {
        parent,
        mandatory,
        quantity,
        header,
        body,
        container: true,
    }
}

const fn full(flags: u32) -> Header {
    Header::FullBox { version: 0, flags }
}

const ENTRY_COUNT_0: &[FieldSpec] = &[field("entry_count", Init::U32(0))];

static FILE: BoxSpec = holder("", true, Quantity::One, Header::None, &[]);

static FTYP: BoxSpec = leaf(
    "file",
    true,
    Quantity::One,
    Header::Box,
    &[
        field("major_brand", Init::Chars("isom")),
        field("minor_version", Init::U32(0)),
        field("compatible_brands", Init::Chars("mp41")),
    ],
);

static MOOV: BoxSpec = holder("file", true, Quantity::One, Header::Box, &[]);
static MDAT: BoxSpec = leaf("file", false, Quantity::Any, Header::Box, &[]);

static MVHD: BoxSpec = leaf(
    "moov",
    true,
    Quantity::One,
    full(0),
    &[
        field("creation_time", Init::U32(0)),
        field("modification_time", Init::U32(0)),
        field("timescale", Init::U32(1000)),
        field("duration", Init::U32(0xffff_ffff)),
        field("rate", Init::U32(0x0001_0000)),
        field("volume", Init::U16(0x0100)),
        field("reserved", Init::Reserved(10)),
        field("matrix", Init::U32Array(&UNITY_MATRIX)),
        field("pre_defined", Init::Reserved(24)),
        field("next_track_ID", Init::U32(0xffff_ffff)),
    ],
);

static TRAK: BoxSpec = holder("moov", true, Quantity::OneOrMore, Header::Box, &[]);

// flags: track enabled | track in movie
static TKHD: BoxSpec = leaf(
    "trak",
    true,
    Quantity::One,
    full(0x000003),
    &[
        field("creation_time", Init::U32(0)),
        field("modification_time", Init::U32(0)),
        field("track_ID", Init::U32(1)),
        field("reserved", Init::Reserved(4)),
        field("duration", Init::U32(0)),
        field("reserved2", Init::Reserved(8)),
        field("layer", Init::U16(0)),
        field("alternate_group", Init::U16(0)),
        field("volume", Init::U16(0x0100)),
        field("reserved3", Init::Reserved(2)),
        field("matrix", Init::U32Array(&UNITY_MATRIX)),
        field("width", Init::U32(0)),
        field("height", Init::U32(0)),
    ],
);

static TREF: BoxSpec = holder("trak", false, Quantity::ZeroOrOne, Header::Box, &[]);
static MDIA: BoxSpec = holder("trak", true, Quantity::One, Header::Box, &[]);

static MDHD: BoxSpec = leaf(
    "mdia",
    true,
    Quantity::One,
    full(0),
    &[
        field("creation_time", Init::U32(0)),
        field("modification_time", Init::U32(0)),
        field("timescale", Init::U32(1000)),
        field("duration", Init::U32(0xffff_ffff)),
        field("language", Init::U16(0)),
        field("pre_defined", Init::U16(0)),
    ],
);

static HDLR: BoxSpec = leaf(
    "mdia",
    true,
    Quantity::One,
    full(0),
    &[
        field("predefined", Init::U32(0)),
        field("handler_type", Init::Chars("vide")),
        field("reserved", Init::Reserved(12)),
        field("name", Init::Chars("VideoHandler\0")),
    ],
);

static MINF: BoxSpec = holder("mdia", true, Quantity::One, Header::Box, &[]);

static VMHD: BoxSpec = leaf(
    "minf",
    true,
    Quantity::One,
    full(0x000001),
    &[
        field("graphicsmode", Init::U16(0)),
        field("opcolor", Init::U16Array(&[0, 0, 0])),
    ],
);

// balance is 8.8 fixed point, 0 is center
static SMHD: BoxSpec = leaf(
    "minf",
    true,
    Quantity::One,
    full(0),
    &[
        field("balance", Init::U16(0)),
        field("reserved", Init::U16(0)),
    ],
);

static DINF: BoxSpec = holder("minf", true, Quantity::One, Header::Box, &[]);
// entry_count must match the number of appended entries.
static DREF: BoxSpec = holder("dinf", true, Quantity::One, full(0), ENTRY_COUNT_0);
// flags: local reference, empty location
static URL: BoxSpec = leaf("dref", false, Quantity::Any, full(0x000001), &[]);

static STBL: BoxSpec = holder("minf", true, Quantity::One, Header::Box, &[]);
static STTS: BoxSpec = leaf("stbl", true, Quantity::One, full(0), ENTRY_COUNT_0);
static STSD: BoxSpec = holder(
    "stbl",
    true,
    Quantity::One,
    full(0),
    &[field("entry_count", Init::U32(1))],
);

// VisualSampleEntry, ISO/IEC 14496-12 8.16.2
static AVC1: BoxSpec = holder(
    "stsd",
    false,
    Quantity::Any,
    Header::Box,
    &[
        field("reserved", Init::Reserved(6)),
        field("data_reference_index", Init::U16(1)),
        field("pre_defined", Init::U16(0)),
        field("reserved2", Init::Reserved(2)),
        field("pre_defined2", Init::U32Array(&[0, 0, 0])),
        field("width", Init::U16(1920)),
        field("height", Init::U16(1080)),
        field("horizresolution", Init::U32(0x0048_0000)),
        field("vertresolution", Init::U32(0x0048_0000)),
        field("reserved3", Init::U32(0)),
        field("frame_count", Init::U16(1)),
        field("compressorname", Init::U8Array(&[0; 32])),
        field("depth", Init::U16(0x0018)),
        field("pre_defined3", Init::U16(0xffff)),
    ],
);

// AVCDecoderConfigurationRecord, ISO/IEC 14496-15 5.2.4.1.1
static AVCC: BoxSpec = leaf(
    "avc1",
    true,
    Quantity::One,
    Header::Box,
    &[
        field("configurationVersion", Init::U8(1)),
        field("AVCProfileIndication", Init::U8(0x4d)),
        field("profile_compatibility", Init::U8(0x00)),
        field("AVCLevelIndication", Init::U8(0x29)),
        // reserved 0b111111, 4-byte NAL unit lengths
        field("lengthSizeMinusOne", Init::U8(0xff)),
        field("sequenceParameterSets", Init::ParameterSets { mask: 0xe0 }),
        field("pictureParameterSets", Init::ParameterSets { mask: 0x00 }),
    ],
);

// AudioSampleEntry, ISO/IEC 14496-12 8.16.2
static MP4A: BoxSpec = holder(
    "stsd",
    false,
    Quantity::Any,
    Header::Box,
    &[
        field("reserved", Init::Reserved(6)),
        field("data_reference_index", Init::U16(1)),
        field("reserved2", Init::U32Array(&[0, 0])),
        field("channelcount", Init::U16(2)),
        field("samplesize", Init::U16(16)),
        field("pre_defined", Init::U16(0)),
        field("reserved3", Init::U16(0)),
        field("samplerate", Init::U32(0)),
    ],
);

// ES_Descriptor with DecoderConfig and SLConfig, ISO/IEC 14496-1 8.3.3.
// Descriptor lengths exclude their tag and length bytes.
static ESDS: BoxSpec = leaf(
    "mp4a",
    false,
    Quantity::One,
    full(0),
    &[
        field("ES_DescrTag", Init::U8(3)),
        field("ES_DescrLength", Init::U8(25)),
        field("ES_ID", Init::U16(1)),
        field("flagsAndStreamPriority", Init::U8(0)),
        field("DecoderConfigDescrTag", Init::U8(4)),
        field("DecoderConfigDescrLength", Init::U8(17)),
        field("objectProfileIndication", Init::U8(0x40)),
        field("streamTypeUpstreamReserved", Init::U8(0x15)),
        field("bufferSizeDB", Init::U8Array(&[0, 0, 0])),
        field("maxBitRate", Init::U32(0)),
        field("avgBitRate", Init::U32(0)),
        field("DecSpecificInfoShortTag", Init::U8(5)),
        field("DecSpecificInfoShortLength", Init::U8(2)),
        field("audioConfigBytes", Init::U8Array(&[0, 0])),
        field("SLConfigDescrTag", Init::U8(6)),
        field("SLConfigDescrLength", Init::U8(1)),
        field("SLConfigDescrPredefined", Init::U8(0x02)),
    ],
);

static STSZ: BoxSpec = leaf(
    "stbl",
    true,
    Quantity::One,
    full(0),
    &[
        field("sample_size", Init::U32(0)),
        field("sample_count", Init::U32(0)),
    ],
);
static STSC: BoxSpec = leaf("stbl", true, Quantity::One, full(0), ENTRY_COUNT_0);
static STCO: BoxSpec = leaf("stbl", true, Quantity::One, full(0), ENTRY_COUNT_0);
static STSS: BoxSpec = leaf("stbl", false, Quantity::ZeroOrOne, full(0), ENTRY_COUNT_0);

static EDTS: BoxSpec = holder("trak", false, Quantity::ZeroOrOne, Header::Box, &[]);
static ELST: BoxSpec = leaf(
    "edts",
    false,
    Quantity::ZeroOrOne,
    full(0),
    &[
        field("entry_count", Init::U32(1)),
        field("segment_duration", Init::U32(0)),
        field("media_time", Init::U32(0xffff_ffff)),
        field("media_rate_integer", Init::U16(1)),
        field("media_rate_fraction", Init::U16(0)),
    ],
);

static MVEX: BoxSpec = holder("moov", false, Quantity::ZeroOrOne, Header::Box, &[]);
static MEHD: BoxSpec = leaf(
    "mvex",
    false,
    Quantity::ZeroOrOne,
    full(0),
    &[field("fragment_duration", Init::U32(0))],
);
static TREX: BoxSpec = leaf(
    "mvex",
    true,
    Quantity::OneOrMore,
    full(0),
    &[
        field("track_ID", Init::U32(1)),
        field("default_sample_description_index", Init::U32(1)),
        field("default_sample_duration", Init::U32(0)),
        field("default_sample_size", Init::U32(0)),
        field("default_sample_flags", Init::U32(0)),
    ],
);

static MOOF: BoxSpec = holder("file", false, Quantity::Any, Header::Box, &[]);
static MFHD: BoxSpec = leaf(
    "moof",
    true,
    Quantity::One,
    full(0),
    &[field("sequence_number", Init::U32(0))],
);
static TRAF: BoxSpec = holder("moof", false, Quantity::Any, Header::Box, &[]);

// flags: default-sample-flags-present
static TFHD: BoxSpec = leaf(
    "traf",
    true,
    Quantity::One,
    full(0x000020),
    &[
        field("track_ID", Init::U32(1)),
        field("default_sample_flags", Init::U32(0)),
    ],
);

static TFDT: BoxSpec = leaf(
    "traf",
    false,
    Quantity::ZeroOrOne,
    Header::FullBox {
        version: 1,
        flags: 0,
    },
    &[field("baseMediaDecodeTime", Init::U64(0))],
);

// flags: data-offset | first-sample-flags | sample-duration | sample-size
static TRUN: BoxSpec = leaf(
    "traf",
    false,
    Quantity::Any,
    full(0x000305),
    &[
        field("sample_count", Init::U32(1)),
        field("data_offset", Init::U32(0)),
        field("first_sample_flags", Init::U32(0)),
        field("sample_duration", Init::U32(0)),
        field("sample_size", Init::U32(0)),
    ],
);

/// Placeholder for box types missing from the table, used while parsing.
static UNKNOWN: BoxSpec = leaf("", false, Quantity::Any, Header::Box, &[]);

/// Type used for boxes whose real type is not in the table.
pub const UNKNOWN_TYPE: &str = "....";

/// Look up the layout of a box type.
pub fn spec(box_type: &str) -> Option<&'static BoxSpec> {
    let spec = match box_type {
        "file" => &FILE,
        "ftyp" => &FTYP,
        "moov" => &MOOV,
        "mdat" => &MDAT,
        "mvhd" => &MVHD,
        "trak" => &TRAK,
        "tkhd" => &TKHD,
        "tref" => &TREF,
        "mdia" => &MDIA,
        "mdhd" => &MDHD,
        "hdlr" => &HDLR,
        "minf" => &MINF,
        "vmhd" => &VMHD,
        "smhd" => &SMHD,
        "dinf" => &DINF,
        "dref" => &DREF,
        "url " => &URL,
        "stbl" => &STBL,
        "stts" => &STTS,
        "stsd" => &STSD,
        "avc1" => &AVC1,
        "avcC" => &AVCC,
        "mp4a" => &MP4A,
        "esds" => &ESDS,
        "stsz" => &STSZ,
        "stsc" => &STSC,
        "stco" => &STCO,
        "stss" => &STSS,
        "edts" => &EDTS,
        "elst" => &ELST,
        "mvex" => &MVEX,
        "mehd" => &MEHD,
        "trex" => &TREX,
        "moof" => &MOOF,
        "mfhd" => &MFHD,
        "traf" => &TRAF,
        "tfhd" => &TFHD,
        "tfdt" => &TFDT,
        "trun" => &TRUN,
        UNKNOWN_TYPE => &UNKNOWN,
        _ => return None,
    };
    Some(spec)
}

/// Value of an element as seen from outside the box.
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    Int(u64),
    Text(String),
    Array(Vec<u32>),
    Bytes(Bytes),
    ParameterSets(Vec<Bytes>),
}

impl Value {
    pub fn as_int(&self) -> Option<u64> {
        match self {
            Value::Int(v) => Some(*v),
            _ => None,
        }
    }
}

impl From<u64> for Value {
    fn from(v: u64) -> Self {
        Value::Int(v)
    }
}

impl From<u32> for Value {
    fn from(v: u32) -> Self {
        Value::Int(v.into())
    }
}

impl From<u16> for Value {
    fn from(v: u16) -> Self {
        Value::Int(v.into())
    }
}

impl From<u8> for Value {
    fn from(v: u8) -> Self {
        Value::Int(v.into())
    }
}

impl From<&str> for Value {
    fn from(v: &str) -> Self {
        Value::Text(v.to_string())
    }
}

impl From<Bytes> for Value {
    fn from(v: Bytes) -> Self {
        Value::Bytes(v)
    }
}

impl From<Vec<u32>> for Value {
    fn from(v: Vec<u32>) -> Self {
        Value::Array(v)
    }
}

impl From<Vec<Bytes>> for Value {
    fn from(v: Vec<Bytes>) -> Self {
        Value::ParameterSets(v)
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Int(v) => write!(f, "{v}"),
            Value::Text(s) => write!(f, "{}", s.escape_default()),
            Value::Array(a) => write_list(f, a.iter()),
            Value::Bytes(b) if b.len() > 32 => write!(f, "<{} bytes>", b.len()),
            Value::Bytes(b) => write_list(f, b.iter()),
            Value::ParameterSets(sets) => {
                write!(f, "[")?;
                for (i, set) in sets.iter().enumerate() {
                    if i > 0 {
                        write!(f, "; ")?;
                    }
                    write_list(f, set.iter())?;
                }
                write!(f, "]")
            }
        }
    }
}

fn write_list<T: fmt::Display>(
    f: &mut fmt::Formatter<'_>,
    items: impl Iterator<Item = T>,
) -> fmt::Result {
    for (i, item) in items.enumerate() {
        if i > 0 {
            write!(f, ",")?;
        }
        write!(f, "{item}")?;
    }
    Ok(())
}

/// Anything that knows its encoded size and can write itself.
pub trait Encode {
    fn byte_length(&self) -> usize;

    /// Append the encoded form to `buf`.
    fn encode(&self, buf: &mut BytesMut);
}

/// One typed element of a box.
#[derive(Debug, Clone, PartialEq)]
pub enum Element {
    Reserved(usize),
    Chars(String),
    U8(u8),
    U16(u16),
    U24(u32),
    U32(u32),
    U64(u64),
    U8Array(Bytes),
    U16Array(Vec<u16>),
    U32Array(Vec<u32>),
    ParameterSets { mask: u8, sets: Vec<Bytes> },
}

impl From<Init> for Element {
    fn from(init: Init) -> Self {
        match init {
            Init::Reserved(n) => Element::Reserved(n),
            Init::Chars(s) => Element::Chars(s.to_string()),
            Init::U8(v) => Element::U8(v),
            Init::U16(v) => Element::U16(v),
            Init::U24(v) => Element::U24(v),
            Init::U32(v) => Element::U32(v),
            Init::U64(v) => Element::U64(v),
            Init::U8Array(v) => Element::U8Array(Bytes::from_static(v)),
            Init::U16Array(v) => Element::U16Array(v.to_vec()),
            Init::U32Array(v) => Element::U32Array(v.to_vec()),
            Init::ParameterSets { mask } => Element::ParameterSets {
                mask,
                sets: Vec::new(),
            },
        }
    }
}

impl Element {
    pub fn value(&self) -> Value {
        match self {
            Element::Reserved(_) => Value::Int(0),
            Element::Chars(s) => Value::Text(s.clone()),
            Element::U8(v) => Value::Int((*v).into()),
            Element::U16(v) => Value::Int((*v).into()),
            Element::U24(v) | Element::U32(v) => Value::Int((*v).into()),
            Element::U64(v) => Value::Int(*v),
            Element::U8Array(b) => Value::Bytes(b.clone()),
            Element::U16Array(a) => Value::Array(a.iter().map(|&v| v.into()).collect()),
            Element::U32Array(a) => Value::Array(a.clone()),
            Element::ParameterSets { sets, .. } => Value::ParameterSets(sets.clone()),
        }
    }

    /// Replace the value, checking kind and range. `key` is only used for
    /// error reporting.
    pub fn assign(&mut self, key: &str, value: Value) -> Result<()> {
        let range = |value: u64| RtspError::FieldRange {
            key: key.to_string(),
            value,
        };
        match (self, value) {
            (Element::U8(v), Value::Int(n)) => *v = u8::try_from(n).map_err(|_| range(n))?,
            (Element::U16(v), Value::Int(n)) => *v = u16::try_from(n).map_err(|_| range(n))?,
            (Element::U24(v), Value::Int(n)) if n <= 0xff_ffff => *v = n as u32,
            (Element::U24(_), Value::Int(n)) => return Err(range(n)),
            (Element::U32(v), Value::Int(n)) => *v = u32::try_from(n).map_err(|_| range(n))?,
            (Element::U64(v), Value::Int(n)) => *v = n,
            (Element::Chars(s), Value::Text(t)) if is_latin1(&t) => *s = t,
            (Element::U8Array(b), Value::Bytes(x)) => *b = x,
            (Element::U16Array(a), Value::Array(x)) => {
                *a = x
                    .into_iter()
                    .map(|v| u16::try_from(v).map_err(|_| range(v.into())))
                    .collect::<Result<_>>()?;
            }
            (Element::U32Array(a), Value::Array(x)) => *a = x,
            (Element::ParameterSets { mask, sets }, Value::ParameterSets(x)) => {
                if x.len() > usize::from(!*mask) {
                    return Err(range(x.len() as u64));
                }
                if let Some(set) = x.iter().find(|s| s.len() > usize::from(u16::MAX)) {
                    return Err(range(set.len() as u64));
                }
                *sets = x;
            }
            _ => {
                return Err(RtspError::FieldType {
                    key: key.to_string(),
                });
            }
        }
        Ok(())
    }

    /// Read the element from the front of `buf`. Variable-size elements
    /// keep the length of their current value, except parameter sets which
    /// carry their own lengths.
    fn decode(&mut self, buf: &mut &[u8]) -> Result<()> {
        match self {
            Element::Reserved(n) => {
                take(buf, *n)?;
            }
            Element::Chars(s) => {
                let raw = take(buf, s.chars().count())?;
                *s = raw.iter().map(|&b| char::from(b)).collect();
            }
            Element::U8(v) => *v = take(buf, 1)?[0],
            Element::U16(v) => *v = u16::from_be_bytes(array(take(buf, 2)?)),
            Element::U24(v) => {
                let raw = take(buf, 3)?;
                *v = u32::from_be_bytes([0, raw[0], raw[1], raw[2]]);
            }
            Element::U32(v) => *v = u32::from_be_bytes(array(take(buf, 4)?)),
            Element::U64(v) => *v = u64::from_be_bytes(array(take(buf, 8)?)),
            Element::U8Array(b) => *b = Bytes::copy_from_slice(take(buf, b.len())?),
            Element::U16Array(a) => {
                for v in a.iter_mut() {
                    *v = u16::from_be_bytes(array(take(buf, 2)?));
                }
            }
            Element::U32Array(a) => {
                for v in a.iter_mut() {
                    *v = u32::from_be_bytes(array(take(buf, 4)?));
                }
            }
            Element::ParameterSets { mask, sets } => {
                let count = take(buf, 1)?[0] & !*mask;
                sets.clear();
                for _ in 0..count {
                    let len = u16::from_be_bytes(array(take(buf, 2)?));
                    sets.push(Bytes::copy_from_slice(take(buf, len.into())?));
                }
            }
        }
        Ok(())
    }
}

impl Encode for Element {
    fn byte_length(&self) -> usize {
        match self {
            Element::Reserved(n) => *n,
            Element::Chars(s) => s.chars().count(),
            Element::U8(_) => 1,
            Element::U16(_) => 2,
            Element::U24(_) => 3,
            Element::U32(_) => 4,
            Element::U64(_) => 8,
            Element::U8Array(b) => b.len(),
            Element::U16Array(a) => a.len() * 2,
            Element::U32Array(a) => a.len() * 4,
            Element::ParameterSets { sets, .. } => {
                1 + sets.iter().map(|s| 2 + s.len()).sum::<usize>()
            }
        }
    }

    fn encode(&self, buf: &mut BytesMut) {
        match self {
            Element::Reserved(n) => buf.put_bytes(0, *n),
            // one byte per char, assignment keeps them below U+0100
            Element::Chars(s) => s.chars().for_each(|c| buf.put_u8(c as u8)),
            Element::U8(v) => buf.put_u8(*v),
            Element::U16(v) => buf.put_u16(*v),
            Element::U24(v) => buf.put_uint(u64::from(*v), 3),
            Element::U32(v) => buf.put_u32(*v),
            Element::U64(v) => buf.put_u64(*v),
            Element::U8Array(b) => buf.put_slice(b),
            Element::U16Array(a) => a.iter().for_each(|&v| buf.put_u16(v)),
            Element::U32Array(a) => a.iter().for_each(|&v| buf.put_u32(v)),
            Element::ParameterSets { mask, sets } => {
                // count was range checked on assignment
                buf.put_u8(*mask | sets.len() as u8);
                for set in sets {
                    buf.put_u16(set.len() as u16);
                    buf.put_slice(set);
                }
            }
        }
    }
}

fn take<'a>(buf: &mut &'a [u8], n: usize) -> Result<&'a [u8]> {
    if buf.len() < n {
        return Err(RtspError::parse(ParseErrorKind::TruncatedBox));
    }
    let (head, tail) = buf.split_at(n);
    *buf = tail;
    Ok(head)
}

fn array<const N: usize>(raw: &[u8]) -> [u8; N] {
    let mut out = [0; N];
    out.copy_from_slice(raw);
    out
}

#[derive(Debug, Clone, PartialEq)]
enum Entry {
    Element(Element),
    Box(IsoBox),
}

impl Entry {
    fn byte_length(&self) -> usize {
        match self {
            Entry::Element(e) => e.byte_length(),
            Entry::Box(b) => b.byte_length(),
        }
    }
}

/// A box instance: header and body elements in wire order, followed by
/// any child boxes.
#[derive(Debug, Clone, PartialEq)]
pub struct IsoBox {
    box_type: String,
    spec: &'static BoxSpec,
    entries: Vec<(String, Entry)>,
    children: usize,
}

impl IsoBox {
    /// A box of `box_type` with every element at its default.
    pub fn new(box_type: &str) -> Result<Self> {
        let spec = spec(box_type).ok_or_else(|| RtspError::UnknownBox(box_type.to_string()))?;

        let mut entries = Vec::with_capacity(spec.body.len() + 4);
        match spec.header {
            Header::None => {}
            Header::Box => push_box_header(&mut entries, box_type),
            Header::FullBox { version, flags } => {
                push_box_header(&mut entries, box_type);
                entries.push(("version".to_string(), Entry::Element(Element::U8(version))));
                entries.push(("flags".to_string(), Entry::Element(Element::U24(flags))));
            }
        }
        for f in spec.body {
            entries.push((f.name.to_string(), Entry::Element(f.init.into())));
        }

        Ok(Self {
            box_type: box_type.to_string(),
            spec,
            entries,
            children: 0,
        })
    }

    /// A box of `box_type` with `config` applied over the defaults.
    pub fn with<'a>(
        box_type: &str,
        config: impl IntoIterator<Item = (&'a str, Value)>,
    ) -> Result<Self> {
        let mut b = Self::new(box_type)?;
        for (key, value) in config {
            b.set(key, value)?;
        }
        Ok(b)
    }

    pub fn box_type(&self) -> &str {
        &self.box_type
    }

    pub fn spec(&self) -> &'static BoxSpec {
        self.spec
    }

    pub fn is_container(&self) -> bool {
        self.spec.container
    }

    pub fn has(&self, key: &str) -> bool {
        self.entries.iter().any(|(k, _)| k == key)
    }

    fn element(&self, key: &str) -> Result<&Element> {
        match self.entries.iter().find(|(k, _)| k == key) {
            Some((_, Entry::Element(e))) => Ok(e),
            _ => Err(self.unknown_field(key)),
        }
    }

    fn unknown_field(&self, key: &str) -> RtspError {
        RtspError::UnknownField {
            box_type: self.box_type.clone(),
            key: key.to_string(),
        }
    }

    /// Value of an element. `size` always reflects the current content.
    pub fn get(&self, key: &str) -> Result<Value> {
        if key == "size" && self.has("size") {
            return Ok(Value::Int(self.byte_length() as u64));
        }
        self.element(key).map(Element::value)
    }

    /// Integer value of an element.
    pub fn get_int(&self, key: &str) -> Result<u64> {
        self.get(key)?.as_int().ok_or_else(|| RtspError::FieldType {
            key: key.to_string(),
        })
    }

    pub fn set(&mut self, key: &str, value: impl Into<Value>) -> Result<()> {
        match self.entries.iter_mut().find(|(k, _)| k == key) {
            Some((_, Entry::Element(e))) => e.assign(key, value.into()),
            _ => Err(self.unknown_field(key)),
        }
    }

    /// Byte offset of an element or child from the start of the box.
    pub fn offset(&self, key: &str) -> Result<usize> {
        let mut offset = 0;
        for (k, entry) in &self.entries {
            if k == key {
                return Ok(offset);
            }
            offset += entry.byte_length();
        }
        Err(self.unknown_field(key))
    }

    /// Add a new element after the existing ones.
    pub fn add(&mut self, key: &str, element: Element) -> Result<()> {
        if self.has(key) {
            return Err(RtspError::DuplicateField {
                box_type: self.box_type.clone(),
                key: key.to_string(),
            });
        }
        self.entries.push((key.to_string(), Entry::Element(element)));
        Ok(())
    }

    /// Append a child box, keyed `box_<n>`.
    pub fn append(&mut self, child: IsoBox) -> &mut Self {
        let key = format!("box_{}", self.children);
        self.children += 1;
        self.entries.push((key, Entry::Box(child)));
        self
    }

    /// Builder form of [`append`](Self::append).
    pub fn child(mut self, child: IsoBox) -> Self {
        self.append(child);
        self
    }

    pub fn children(&self) -> impl Iterator<Item = &IsoBox> {
        self.entries.iter().filter_map(|(_, entry)| match entry {
            Entry::Box(b) => Some(b),
            Entry::Element(_) => None,
        })
    }

    /// First descendant of `box_type`, depth first.
    pub fn find(&self, box_type: &str) -> Option<&IsoBox> {
        self.children().find_map(|child| {
            if child.box_type == box_type {
                Some(child)
            } else {
                child.find(box_type)
            }
        })
    }

    /// Mutable variant of [`find`](Self::find).
    pub fn find_mut(&mut self, box_type: &str) -> Option<&mut IsoBox> {
        for (_, entry) in self.entries.iter_mut() {
            if let Entry::Box(child) = entry {
                if child.box_type == box_type {
                    return Some(child);
                }
                if let Some(found) = child.find_mut(box_type) {
                    return Some(found);
                }
            }
        }
        None
    }

    /// Encode into a fresh buffer.
    pub fn to_bytes(&self) -> Bytes {
        let mut buf = BytesMut::with_capacity(self.byte_length());
        self.encode(&mut buf);
        buf.freeze()
    }

    /// Parse one box from the front of `data`, returning it and the number
    /// of bytes it spans. Unknown types are kept opaque, with their payload
    /// in a `data` element.
    pub fn decode(data: &[u8]) -> Result<(Self, usize)> {
        let size = read_size(data)?;
        let box_type: String = data[4..8].iter().map(|&b| char::from(b)).collect();

        let mut b = match spec(&box_type) {
            Some(_) => Self::new(&box_type)?,
            None => Self::new(UNKNOWN_TYPE)?,
        };

        // size is derived, type is already known
        let mut rest = &data[8..size];
        for (_, entry) in b.entries.iter_mut().skip(2) {
            if let Entry::Element(e) = entry {
                e.decode(&mut rest)?;
            }
        }
        if b.box_type == UNKNOWN_TYPE {
            b.set("type", Value::Text(box_type.clone()))?;
            b.box_type = box_type;
        }

        if b.is_container() {
            b.parse(rest)?;
        } else if !rest.is_empty() {
            b.add("data", Element::U8Array(Bytes::copy_from_slice(rest)))?;
        }
        Ok((b, size))
    }

    /// Append every box found in `data` as a child.
    pub fn parse(&mut self, mut data: &[u8]) -> Result<()> {
        while !data.is_empty() {
            let (child, size) = Self::decode(data)?;
            self.append(child);
            data = &data[size..];
        }
        Ok(())
    }

    /// Parse a sequence of top level boxes.
    pub fn parse_file(data: &[u8]) -> Result<Vec<IsoBox>> {
        let mut file = Self::new("file")?;
        file.parse(data)?;
        Ok(file
            .entries
            .into_iter()
            .filter_map(|(_, entry)| match entry {
                Entry::Box(b) => Some(b),
                Entry::Element(_) => None,
            })
            .collect())
    }

    /// Pretty-print the box hierarchy.
    ///
    /// ```text
    /// [mfhd] (16)
    ///   size = 16 (4)
    ///   type = mfhd (4)
    ///   ...
    /// ```
    pub fn format(&self, indent: usize) -> String {
        let mut out = String::new();
        self.format_into(&mut out, indent);
        out
    }

    fn format_into(&self, out: &mut String, indent: usize) {
        let _ = write!(out, "{:indent$}[{}] ({})", "", self.box_type, self.byte_length());
        for (key, entry) in &self.entries {
            out.push('\n');
            match entry {
                Entry::Box(b) => b.format_into(out, indent + 2),
                Entry::Element(e) => {
                    let value = if key == "size" {
                        Value::Int(self.byte_length() as u64)
                    } else {
                        e.value()
                    };
                    let _ = write!(
                        out,
                        "{:width$}{key} = {value} ({})",
                        "",
                        e.byte_length(),
                        width = indent + 2
                    );
                }
            }
        }
    }
}

impl Encode for IsoBox {
    fn byte_length(&self) -> usize {
        self.entries.iter().map(|(_, e)| e.byte_length()).sum()
    }

    fn encode(&self, buf: &mut BytesMut) {
        for (key, entry) in &self.entries {
            match entry {
                Entry::Element(_) if key == "size" => buf.put_u32(self.byte_length() as u32),
                Entry::Element(e) => e.encode(buf),
                Entry::Box(b) => b.encode(buf),
            }
        }
    }
}

impl fmt::Display for IsoBox {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.format(0))
    }
}

/// Chars elements hold one byte per character, read as Latin-1, so box
/// types such as `©nam` survive a parse.
fn is_latin1(s: &str) -> bool {
    s.chars().all(|c| u32::from(c) <= 0xff)
}

fn push_box_header(entries: &mut Vec<(String, Entry)>, box_type: &str) {
    entries.push(("size".to_string(), Entry::Element(Element::U32(0))));
    entries.push((
        "type".to_string(),
        Entry::Element(Element::Chars(box_type.to_string())),
    ));
}

fn read_size(data: &[u8]) -> Result<usize> {
    if data.len() < 8 {
        return Err(RtspError::parse(ParseErrorKind::TruncatedBox));
    }
    let size = u32::from_be_bytes(array(&data[..4])) as usize;
    if size < 8 || size > data.len() {
        return Err(RtspError::parse(ParseErrorKind::TruncatedBox));
    }
    Ok(size)
}
