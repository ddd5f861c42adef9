//! Conversion of TrueType/OpenType fonts to the WOFF and WOFF2 web formats.
//!
//! Both containers wrap the tables of the original font. WOFF compresses each
//! table with zlib on its own; WOFF2 concatenates them into one brotli stream.
//! No table is transformed, so `glyf` and `loca` are stored with the null
//! transform.

use std::io::Write;

use flate2::Compression;
use flate2::write::ZlibEncoder;
use rayon::prelude::*;
use thiserror::Error;

use super::Transform;
use crate::asset::Asset;

#[derive(Debug, Error)]
pub enum FontError {
    #[error("Font data is truncated")]
    Truncated,

    #[error("Font collections are not supported")]
    Collection,

    #[error("Unsupported sfnt version 0x{0:08x}")]
    Version(u32),

    #[error("Table '{0}' lies outside of the font data")]
    TableBounds(String),

    #[error("Compression error: {0}")]
    Io(#[from] std::io::Error),
}

const SFNT_HEADER: usize = 12;
const SFNT_RECORD: usize = 16;
const WOFF_HEADER: usize = 44;
const WOFF_RECORD: usize = 20;
const WOFF2_HEADER: usize = 48;

/// Tags with a one byte code in the WOFF2 table directory.
const KNOWN_TAGS: [&[u8; 4]; 63] = [
    b"cmap", b"head", b"hhea", b"hmtx", b"maxp", b"name", b"OS/2", b"post", b"cvt ", b"fpgm",
    b"glyf", b"loca", b"prep", b"CFF ", b"VORG", b"EBDT", b"EBLC", b"gasp", b"hdmx", b"kern",
    b"LTSH", b"PCLT", b"VDMX", b"vhea", b"vmtx", b"BASE", b"GDEF", b"GPOS", b"GSUB", b"EBSC",
    b"JSTF", b"MATH", b"CBDT", b"CBLC", b"COLR", b"CPAL", b"SVG ", b"sbix", b"acnt", b"avar",
    b"bdat", b"bloc", b"bsln", b"cvar", b"fdsc", b"feat", b"fmtx", b"fvar", b"gvar", b"hsty",
    b"just", b"lcar", b"mort", b"morx", b"opbd", b"prop", b"trak", b"Zapf", b"Silf", b"Glat",
    b"Gloc", b"Feat", b"Sill",
];

struct Table<'a> {
    tag: [u8; 4],
    checksum: u32,
    data: &'a [u8],
}

/// Table directory of a single sfnt font, with tables sorted by tag.
struct Sfnt<'a> {
    flavor: u32,
    tables: Vec<Table<'a>>,
}

impl<'a> Sfnt<'a> {
    fn parse(data: &'a [u8]) -> Result<Self, FontError> {
        let flavor = read_u32(data, 0)?;
        match flavor {
            0x0001_0000 | 0x4f54_544f | 0x7472_7565 => {}
            0x7474_6366 => return Err(FontError::Collection),
            other => return Err(FontError::Version(other)),
        }

        let count = read_u16(data, 4)? as usize;
        let mut tables = Vec::with_capacity(count);

        for i in 0..count {
            let at = SFNT_HEADER + i * SFNT_RECORD;
            let record = data.get(at..at + SFNT_RECORD).ok_or(FontError::Truncated)?;

            let tag = [record[0], record[1], record[2], record[3]];
            let checksum = read_u32(record, 4)?;
            let offset = read_u32(record, 8)? as usize;
            let length = read_u32(record, 12)? as usize;

            let data = offset
                .checked_add(length)
                .and_then(|end| data.get(offset..end))
                .ok_or_else(|| FontError::TableBounds(tag_name(&tag)))?;

            tables.push(Table {
                tag,
                checksum,
                data,
            });
        }

        tables.sort_by_key(|table| table.tag);
        Ok(Self { flavor, tables })
    }

    /// Size of the font rebuilt from the tables, with 4 byte padding.
    fn sfnt_size(&self) -> usize {
        SFNT_HEADER
            + SFNT_RECORD * self.tables.len()
            + self.tables.iter().map(|t| pad4(t.data.len())).sum::<usize>()
    }
}

fn read_u16(data: &[u8], at: usize) -> Result<u16, FontError> {
    data.get(at..at + 2)
        .map(|b| u16::from_be_bytes([b[0], b[1]]))
        .ok_or(FontError::Truncated)
}

fn read_u32(data: &[u8], at: usize) -> Result<u32, FontError> {
    data.get(at..at + 4)
        .map(|b| u32::from_be_bytes([b[0], b[1], b[2], b[3]]))
        .ok_or(FontError::Truncated)
}

fn tag_name(tag: &[u8; 4]) -> String {
    String::from_utf8_lossy(tag).into_owned()
}

fn pad4(n: usize) -> usize {
    (n + 3) & !3
}

fn align(out: &mut Vec<u8>) {
    out.resize(pad4(out.len()), 0);
}

/// Wraps an sfnt font in a WOFF 1.0 container.
pub fn to_woff(data: &[u8]) -> Result<Vec<u8>, FontError> {
    let font = Sfnt::parse(data)?;

    let blobs = font
        .tables
        .iter()
        .map(|table| -> Result<Vec<u8>, FontError> {
            let mut encoder = ZlibEncoder::new(Vec::new(), Compression::best());
            encoder.write_all(table.data)?;
            let compressed = encoder.finish()?;
            if compressed.len() < table.data.len() {
                Ok(compressed)
            } else {
                Ok(table.data.to_vec())
            }
        })
        .collect::<Result<Vec<_>, _>>()?;

    let mut out = Vec::with_capacity(WOFF_HEADER + font.tables.len() * WOFF_RECORD);
    out.extend(b"wOFF");
    out.extend(font.flavor.to_be_bytes());
    out.extend(0u32.to_be_bytes()); // length, patched below
    out.extend((font.tables.len() as u16).to_be_bytes());
    out.extend(0u16.to_be_bytes());
    out.extend((font.sfnt_size() as u32).to_be_bytes());
    out.extend(1u16.to_be_bytes());
    out.extend(0u16.to_be_bytes());
    out.extend([0u8; 20]); // metadata and private blocks

    let mut offset = WOFF_HEADER + font.tables.len() * WOFF_RECORD;
    for (table, blob) in font.tables.iter().zip(&blobs) {
        out.extend(table.tag);
        out.extend((offset as u32).to_be_bytes());
        out.extend((blob.len() as u32).to_be_bytes());
        out.extend((table.data.len() as u32).to_be_bytes());
        out.extend(table.checksum.to_be_bytes());
        offset += pad4(blob.len());
    }

    for blob in &blobs {
        out.extend(blob);
        align(&mut out);
    }

    let length = (out.len() as u32).to_be_bytes();
    out[8..12].copy_from_slice(&length);
    Ok(out)
}

/// Wraps an sfnt font in a WOFF 2.0 container.
pub fn to_woff2(data: &[u8]) -> Result<Vec<u8>, FontError> {
    let font = Sfnt::parse(data)?;

    let mut order: Vec<&Table> = font.tables.iter().filter(|t| &t.tag != b"loca").collect();
    if let Some(loca) = font.tables.iter().find(|t| &t.tag == b"loca") {
        match order.iter().position(|t| &t.tag == b"glyf") {
            Some(glyf) => order.insert(glyf + 1, loca),
            None => order.push(loca),
        }
    }

    let mut directory = Vec::new();
    let mut stream = Vec::new();

    for table in &order {
        let transform = match &table.tag {
            b"glyf" | b"loca" => 3 << 6,
            _ => 0,
        };

        match KNOWN_TAGS.iter().position(|known| *known == &table.tag) {
            Some(index) => directory.push(index as u8 | transform),
            None => {
                directory.push(0x3f | transform);
                directory.extend(table.tag);
            }
        }

        write_base128(&mut directory, table.data.len() as u32);
        stream.extend(table.data);
    }

    let mut compressor = brotli::CompressorWriter::new(Vec::new(), 4096, 11, 22);
    compressor.write_all(&stream)?;
    let compressed = compressor.into_inner();

    let mut out = Vec::with_capacity(WOFF2_HEADER + directory.len() + compressed.len() + 3);
    out.extend(b"wOF2");
    out.extend(font.flavor.to_be_bytes());
    out.extend(0u32.to_be_bytes()); // length, patched below
    out.extend((order.len() as u16).to_be_bytes());
    out.extend(0u16.to_be_bytes());
    out.extend((font.sfnt_size() as u32).to_be_bytes());
    out.extend((compressed.len() as u32).to_be_bytes());
    out.extend(1u16.to_be_bytes());
    out.extend(0u16.to_be_bytes());
    out.extend([0u8; 20]); // metadata and private blocks

    out.extend(directory);
    out.extend(compressed);
    align(&mut out);

    let length = (out.len() as u32).to_be_bytes();
    out[8..12].copy_from_slice(&length);
    Ok(out)
}

/// UIntBase128: big-endian groups of seven bits, high bit set on all but the
/// last byte.
fn write_base128(out: &mut Vec<u8>, mut value: u32) {
    let mut groups = [0u8; 5];
    let mut len = 0;

    loop {
        groups[len] = (value & 0x7f) as u8;
        len += 1;
        value >>= 7;
        if value == 0 {
            break;
        }
    }

    for i in (0..len).rev() {
        let flag = if i == 0 { 0 } else { 0x80 };
        out.push(groups[i] | flag);
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FontFormat {
    Woff,
    Woff2,
}

impl FontFormat {
    pub fn extension(self) -> &'static str {
        match self {
            FontFormat::Woff => "woff",
            FontFormat::Woff2 => "woff2",
        }
    }

    fn convert(self, data: &[u8]) -> Result<Vec<u8>, FontError> {
        match self {
            FontFormat::Woff => to_woff(data),
            FontFormat::Woff2 => to_woff2(data),
        }
    }
}

/// Converts each input font into the given web format.
#[derive(Debug, Clone, Copy)]
pub struct ConvertFont(pub FontFormat);

impl Transform for ConvertFont {
    fn name(&self) -> &'static str {
        match self.0 {
            FontFormat::Woff => "ttf2woff",
            FontFormat::Woff2 => "ttf2woff2",
        }
    }

    fn apply(&self, assets: Vec<Asset>) -> anyhow::Result<Vec<Asset>> {
        let format = self.0;

        assets
            .into_par_iter()
            .map(|asset| -> anyhow::Result<Asset> {
                let contents = format.convert(&asset.contents).map_err(|e| {
                    anyhow::Error::new(e).context(format!("couldn't convert '{}'", asset.path))
                })?;

                Ok(Asset {
                    path: asset.path.with_extension(format.extension()),
                    source: asset.source,
                    contents,
                })
            })
            .collect()
    }
}
