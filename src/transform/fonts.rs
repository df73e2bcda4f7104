//! TrueType to web font conversion.

use std::io::{ErrorKind, Write};
use std::process::Stdio;
use std::time::Instant;

use camino::{Utf8Path, Utf8PathBuf};
use flate2::Compression;
use flate2::write::ZlibEncoder;
use rayon::prelude::*;
use thiserror::Error;
use tokio::process::Command;
use tracing::{info, warn};

use crate::error::GlobError;
use crate::io::{as_overhead, glob_files, rebase, write};
use crate::transform::blocking;

/// Name of the WOFF2 encoder executable looked up on `PATH`.
pub const WOFF2_COMPRESS: &str = "woff2_compress";

const WOFF_SIGNATURE: u32 = 0x774F_4646;
const WOFF_HEADER_LEN: usize = 44;
const WOFF_ENTRY_LEN: usize = 20;
const SFNT_HEADER_LEN: usize = 12;
const SFNT_ENTRY_LEN: usize = 16;

#[derive(Debug, Error)]
pub enum FontError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("'{0}' is not a valid TrueType font: {1}")]
    Malformed(Utf8PathBuf, String),

    #[error("{WOFF2_COMPRESS} failed on '{0}':\n{1}")]
    Woff2(Utf8PathBuf, String),

    #[error(transparent)]
    Glob(#[from] GlobError),

    #[error("Worker failed: {0}")]
    Join(#[from] tokio::task::JoinError),
}

struct TableRecord<'a> {
    tag: [u8; 4],
    checksum: u32,
    data: &'a [u8],
}

fn read_u16(data: &[u8], at: usize) -> Option<u16> {
    Some(u16::from_be_bytes(data.get(at..at + 2)?.try_into().ok()?))
}

fn read_u32(data: &[u8], at: usize) -> Option<u32> {
    Some(u32::from_be_bytes(data.get(at..at + 4)?.try_into().ok()?))
}

fn padded(len: usize) -> usize {
    (len + 3) & !3
}

fn parse_tables(sfnt: &[u8]) -> Result<(u32, Vec<TableRecord<'_>>), String> {
    let flavor = read_u32(sfnt, 0).ok_or("file too short")?;
    if !matches!(flavor, 0x0001_0000 | 0x4F54_544F | 0x7472_7565) {
        return Err(format!("unknown sfnt version {flavor:#010x}"));
    }

    let count = read_u16(sfnt, 4).ok_or("file too short")? as usize;
    if count == 0 {
        return Err(String::from("no tables"));
    }

    let mut tables = Vec::with_capacity(count);

    for i in 0..count {
        let at = SFNT_HEADER_LEN + i * SFNT_ENTRY_LEN;
        let record = sfnt
            .get(at..at + SFNT_ENTRY_LEN)
            .ok_or("table directory truncated")?;

        let mut tag = [0; 4];
        tag.copy_from_slice(&record[..4]);
        let checksum = read_u32(record, 4).ok_or("table directory truncated")?;
        let offset = read_u32(record, 8).ok_or("table directory truncated")? as usize;
        let length = read_u32(record, 12).ok_or("table directory truncated")? as usize;

        let data = offset
            .checked_add(length)
            .and_then(|end| sfnt.get(offset..end))
            .ok_or_else(|| format!("table '{}' out of bounds", String::from_utf8_lossy(&tag)))?;

        tables.push(TableRecord {
            tag,
            checksum,
            data,
        });
    }

    tables.sort_by_key(|table| table.tag);
    Ok((flavor, tables))
}

fn deflate(data: &[u8]) -> std::io::Result<Vec<u8>> {
    let mut encoder = ZlibEncoder::new(Vec::new(), Compression::best());
    encoder.write_all(data)?;
    encoder.finish()
}

/// Wrap an sfnt font in a WOFF 1.0 container. Each table is stored zlib
/// compressed unless that would not make it smaller.
pub fn encode_woff(sfnt: &[u8]) -> Result<Vec<u8>, String> {
    let (flavor, tables) = parse_tables(sfnt)?;

    let mut blocks = Vec::with_capacity(tables.len());
    for table in &tables {
        let compressed = deflate(table.data).map_err(|e| e.to_string())?;
        if compressed.len() < table.data.len() {
            blocks.push(compressed);
        } else {
            blocks.push(table.data.to_vec());
        }
    }

    let total_sfnt = SFNT_HEADER_LEN
        + SFNT_ENTRY_LEN * tables.len()
        + tables.iter().map(|t| padded(t.data.len())).sum::<usize>();

    let data_start = WOFF_HEADER_LEN + WOFF_ENTRY_LEN * tables.len();
    let length = data_start + blocks.iter().map(|b| padded(b.len())).sum::<usize>();

    let to_u32 = |n: usize| u32::try_from(n).map_err(|_| String::from("font too large"));

    let mut out = Vec::with_capacity(length);
    out.extend_from_slice(&WOFF_SIGNATURE.to_be_bytes());
    out.extend_from_slice(&flavor.to_be_bytes());
    out.extend_from_slice(&to_u32(length)?.to_be_bytes());
    out.extend_from_slice(&(tables.len() as u16).to_be_bytes());
    out.extend_from_slice(&0u16.to_be_bytes()); // reserved
    out.extend_from_slice(&to_u32(total_sfnt)?.to_be_bytes());
    out.extend_from_slice(&1u16.to_be_bytes()); // major version
    out.extend_from_slice(&0u16.to_be_bytes()); // minor version
    out.extend_from_slice(&[0; 20]); // no metadata, no private block

    let mut offset = data_start;
    for (table, block) in tables.iter().zip(&blocks) {
        out.extend_from_slice(&table.tag);
        out.extend_from_slice(&to_u32(offset)?.to_be_bytes());
        out.extend_from_slice(&to_u32(block.len())?.to_be_bytes());
        out.extend_from_slice(&to_u32(table.data.len())?.to_be_bytes());
        out.extend_from_slice(&table.checksum.to_be_bytes());
        offset += padded(block.len());
    }

    for block in &blocks {
        out.extend_from_slice(block);
        out.resize(padded(out.len()), 0);
    }

    debug_assert_eq!(out.len(), length);
    Ok(out)
}

/// Write a `.woff` next to the mirrored location of every `.ttf` under `src`.
pub fn convert_woff(src: &Utf8Path, out: &Utf8Path) -> Result<Vec<Utf8PathBuf>, FontError> {
    let fonts = glob_files(src, "**/*.ttf")?;

    fonts
        .par_iter()
        .map(|font| -> Result<_, FontError> {
            let sfnt = std::fs::read(font)?;
            let woff = encode_woff(&sfnt).map_err(|e| FontError::Malformed(font.clone(), e))?;

            let path = rebase(font, src, out).with_extension("woff");
            write(&path, woff)?;
            Ok(path)
        })
        .collect()
}

/// Run the WOFF2 encoder on every `.ttf` under `src`. The encoder writes its
/// result next to the input, so each font is first copied into `out` and the
/// copy removed afterwards. Returns `None` when the encoder is not installed.
pub async fn convert_woff2(src: &Utf8Path, out: &Utf8Path) -> Result<Option<Vec<Utf8PathBuf>>, FontError> {
    let fonts = {
        let src = src.to_owned();
        blocking(move || glob_files(&src, "**/*.ttf").map_err(FontError::from)).await?
    };

    let mut written = Vec::with_capacity(fonts.len());

    for font in &fonts {
        let copy = rebase(font, src, out);
        if let Some(dir) = copy.parent() {
            tokio::fs::create_dir_all(dir).await?;
        }
        tokio::fs::copy(font, &copy).await?;

        let result = Command::new(WOFF2_COMPRESS)
            .arg(copy.as_str())
            .stdout(Stdio::null())
            .stderr(Stdio::piped())
            .output()
            .await;

        tokio::fs::remove_file(&copy).await?;

        match result {
            Ok(output) if output.status.success() => {
                written.push(copy.with_extension("woff2"));
            }
            Ok(output) => {
                let stderr = String::from_utf8_lossy(&output.stderr).into_owned();
                return Err(FontError::Woff2(font.clone(), stderr));
            }
            Err(e) if e.kind() == ErrorKind::NotFound => {
                warn!("{WOFF2_COMPRESS} is not installed, skipping .woff2 output");
                return Ok(None);
            }
            Err(e) => return Err(e.into()),
        }
    }

    Ok(Some(written))
}

/// Convert every font to `.woff` and, when the encoder is available,
/// `.woff2`.
pub async fn convert_fonts(src: Utf8PathBuf, out: Utf8PathBuf) -> Result<Vec<Utf8PathBuf>, FontError> {
    let s = Instant::now();

    let mut written = {
        let (src, out) = (src.clone(), out.clone());
        blocking(move || convert_woff(&src, &out)).await?
    };

    if let Some(woff2) = convert_woff2(&src, &out).await? {
        written.extend(woff2);
    }

    if !written.is_empty() {
        info!("converted {} font files {}", written.len(), as_overhead(s));
    }

    Ok(written)
}

#[cfg(test)]
mod tests {
    use std::io::Read;

    use flate2::read::ZlibDecoder;

    use super::*;
    use crate::io::tmp;

    fn sfnt(tables: &[(&[u8; 4], Vec<u8>)]) -> Vec<u8> {
        let mut out = Vec::new();
        out.extend_from_slice(&0x0001_0000u32.to_be_bytes());
        out.extend_from_slice(&(tables.len() as u16).to_be_bytes());
        out.extend_from_slice(&[0; 6]);

        let mut offset = SFNT_HEADER_LEN + SFNT_ENTRY_LEN * tables.len();
        for (i, (tag, data)) in tables.iter().enumerate() {
            out.extend_from_slice(*tag);
            out.extend_from_slice(&(i as u32 + 7).to_be_bytes());
            out.extend_from_slice(&(offset as u32).to_be_bytes());
            out.extend_from_slice(&(data.len() as u32).to_be_bytes());
            offset += padded(data.len());
        }

        for (_, data) in tables {
            out.extend_from_slice(data);
            out.resize(padded(out.len()), 0);
        }

        out
    }

    #[test]
    fn test_encode_woff() {
        let font = sfnt(&[(b"zzzz", vec![0; 200]), (b"aaaa", b"xyz".to_vec())]);
        let woff = encode_woff(&font).unwrap();

        assert_eq!(read_u32(&woff, 0), Some(WOFF_SIGNATURE));
        assert_eq!(read_u32(&woff, 4), Some(0x0001_0000));
        assert_eq!(read_u32(&woff, 8), Some(woff.len() as u32));
        assert_eq!(read_u16(&woff, 12), Some(2));
        assert_eq!(read_u32(&woff, 16), Some(12 + 32 + 4 + 200));

        // first entry: "aaaa", stored raw
        let entry = &woff[WOFF_HEADER_LEN..WOFF_HEADER_LEN + WOFF_ENTRY_LEN];
        assert_eq!(&entry[..4], b"aaaa");
        assert_eq!(read_u32(entry, 8), Some(3));
        assert_eq!(read_u32(entry, 12), Some(3));
        assert_eq!(read_u32(entry, 16), Some(8));
        let offset = read_u32(entry, 4).unwrap() as usize;
        assert_eq!(offset % 4, 0);
        assert_eq!(&woff[offset..offset + 3], b"xyz");

        // second entry: "zzzz", compressed
        let entry = &woff[WOFF_HEADER_LEN + WOFF_ENTRY_LEN..WOFF_HEADER_LEN + 2 * WOFF_ENTRY_LEN];
        assert_eq!(&entry[..4], b"zzzz");
        let offset = read_u32(entry, 4).unwrap() as usize;
        let comp = read_u32(entry, 8).unwrap() as usize;
        assert!(comp < 200);
        assert_eq!(offset % 4, 0);

        let mut data = Vec::new();
        ZlibDecoder::new(&woff[offset..offset + comp])
            .read_to_end(&mut data)
            .unwrap();
        assert_eq!(data, vec![0; 200]);
    }

    #[test]
    fn test_malformed() {
        assert!(encode_woff(b"").is_err());
        assert!(encode_woff(b"wOFFxxxxxxxxxxxx").is_err());

        let mut font = sfnt(&[(b"head", vec![1; 16])]);
        font.truncate(font.len() - 8);
        assert!(encode_woff(&font).is_err());
    }

    #[test]
    fn test_convert_woff_mirrors_layout() {
        let (_guard, root) = tmp();
        let src = root.join("fonts");
        let out = root.join("app/fonts");
        write(&src.join("Inter/Inter.ttf"), sfnt(&[(b"head", vec![1; 64])])).unwrap();
        write(&src.join("Inter/readme.txt"), "").unwrap();

        let written = convert_woff(&src, &out).unwrap();
        assert_eq!(written, vec![out.join("Inter/Inter.woff")]);
        assert!(!out.join("Inter/readme.txt").exists());
    }

    #[test]
    fn test_convert_woff_reports_font() {
        let (_guard, root) = tmp();
        let src = root.join("fonts");
        write(&src.join("bad.ttf"), "not a font").unwrap();

        match convert_woff(&src, &root.join("out")) {
            Err(FontError::Malformed(path, _)) => assert_eq!(path, src.join("bad.ttf")),
            other => panic!("unexpected {other:?}"),
        }
    }
}
