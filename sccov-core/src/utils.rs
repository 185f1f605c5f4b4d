use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::Path;
use std::str::FromStr;

use anyhow::{Context, Result};

use crate::error::ExportError;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Compression {
    Gzip,
    Zstd,
}

impl FromStr for Compression {
    type Err = ExportError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "gzip" => Ok(Compression::Gzip),
            "zstd" | "zstandard" => Ok(Compression::Zstd),
            _ => Err(ExportError::Config(format!("unsupported compression: {}", s))),
        }
    }
}

impl Compression {
    /// Recognize a compression scheme from the trailing extension of a file
    /// name or suffix string.
    pub fn from_suffix(suffix: &str) -> Option<Self> {
        let s = suffix.to_lowercase();
        if s.ends_with(".gz") {
            Some(Compression::Gzip)
        } else if s.ends_with(".zst") {
            Some(Compression::Zstd)
        } else {
            None
        }
    }

    fn default_level(&self) -> u32 {
        match self {
            Compression::Gzip => 6,
            Compression::Zstd => 3,
        }
    }
}

/// Create a file for writing, wrapping it in the requested compression
/// encoder. Levels default to 6 for gzip and 3 for zstd.
pub fn open_file_for_write<P: AsRef<Path>>(
    filename: P,
    compression: Option<Compression>,
    compression_level: Option<u32>,
) -> Result<Box<dyn Write + Send>> {
    let file = File::create(&filename)
        .map_err(ExportError::Io)
        .with_context(|| format!("cannot create file: {}", filename.as_ref().display()))?;
    encode_writer(file, compression, compression_level)
}

/// Wrap an arbitrary sink in the requested compression encoder.
pub(crate) fn encode_writer<W: Write + Send + 'static>(
    sink: W,
    compression: Option<Compression>,
    compression_level: Option<u32>,
) -> Result<Box<dyn Write + Send>> {
    let buffer = BufWriter::new(sink);
    let writer: Box<dyn Write + Send> = match compression {
        None => Box::new(buffer),
        Some(c @ Compression::Gzip) => Box::new(flate2::write::GzEncoder::new(
            buffer,
            flate2::Compression::new(compression_level.unwrap_or(c.default_level())),
        )),
        Some(c @ Compression::Zstd) => {
            let mut zstd = zstd::stream::Encoder::new(
                buffer,
                compression_level.unwrap_or(c.default_level()) as i32,
            )?;
            zstd.multithread(8)?;
            Box::new(zstd.auto_finish())
        }
    };
    Ok(writer)
}

/// Open a file for reading, possibly compressed. Supports gzip and zstd.
pub fn open_file_for_read<P: AsRef<Path>>(file: P) -> Result<Box<dyn std::io::Read>> {
    let open = || File::open(file.as_ref()).map_err(ExportError::Io);
    let reader: Box<dyn std::io::Read> = match detect_compression(file.as_ref())? {
        Some(Compression::Gzip) => Box::new(flate2::read::MultiGzDecoder::new(open()?)),
        Some(Compression::Zstd) => Box::new(
            zstd::stream::read::Decoder::new(open()?).map_err(ExportError::Io)?,
        ),
        None => Box::new(open()?),
    };
    Ok(reader)
}

/// Determine the compression type of an existing file, by magic bytes for
/// gzip and by extension for zstd.
fn detect_compression<P: AsRef<Path>>(file: P) -> Result<Option<Compression>> {
    let f = File::open(file.as_ref())
        .map_err(ExportError::Io)
        .with_context(|| format!("cannot open file: {}", file.as_ref().display()))?;
    if flate2::read::MultiGzDecoder::new(f).header().is_some() {
        Ok(Some(Compression::Gzip))
    } else if file.as_ref().extension().is_some_and(|ext| ext == "zst") {
        Ok(Some(Compression::Zstd))
    } else {
        Ok(None)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_compression_from_suffix() {
        assert_eq!(Compression::from_suffix(".bed.gz"), Some(Compression::Gzip));
        assert_eq!(Compression::from_suffix(".bedgraph.zst"), Some(Compression::Zstd));
        assert_eq!(Compression::from_suffix(".ZST"), Some(Compression::Zstd));
        assert_eq!(Compression::from_suffix(".bedgraph"), None);
        assert_eq!(Compression::from_suffix(".bw"), None);
    }

    #[test]
    fn test_compression_from_str() {
        assert!(matches!("gzip".parse(), Ok(Compression::Gzip)));
        assert!(matches!("Zstandard".parse(), Ok(Compression::Zstd)));
        assert!("lz4".parse::<Compression>().is_err());
    }

    #[test]
    fn test_io_errors_carry_typed_kind() {
        let dir = tempfile::tempdir().unwrap();
        let missing = dir.path().join("no_such_dir").join("data.txt");

        for err in [
            open_file_for_read(&missing).err().unwrap(),
            open_file_for_write(&missing, None, None).err().unwrap(),
        ] {
            assert!(err
                .chain()
                .any(|e| matches!(e.downcast_ref(), Some(ExportError::Io(_)))));
        }
    }

    #[test]
    fn test_write_read_roundtrip() {
        let dir = tempfile::tempdir().unwrap();
        for compression in [None, Some(Compression::Gzip), Some(Compression::Zstd)] {
            let path = dir.path().join(match compression {
                None => "plain.txt",
                Some(Compression::Gzip) => "data.txt.gz",
                Some(Compression::Zstd) => "data.txt.zst",
            });
            {
                let mut w = open_file_for_write(&path, compression, None).unwrap();
                writeln!(w, "chr1\t0\t100").unwrap();
            }
            let mut buf = String::new();
            open_file_for_read(&path)
                .unwrap()
                .read_to_string(&mut buf)
                .unwrap();
            assert_eq!(buf, "chr1\t0\t100\n");
        }
    }
}
