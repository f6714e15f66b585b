//! Archive codecs.
//!
//! An [`ArchiveSink`] appends members strictly in call order and produces
//! identical bytes for identical call sequences: timestamps, owners and
//! compression settings are fixed, only the permission bits come from the
//! source metadata.
//!
//! - [`ZipSink`] - deflate-compressed zip (default deploy format)
//! - [`TarZstSink`] - GNU tar compressed with zstd

use std::fs::File;
use std::io::{self, Seek, Write};
use std::path::{Path, PathBuf};

use tar::{EntryType, Header};
use zip::write::SimpleFileOptions;
use zip::{CompressionMethod, DateTime as ZipDateTime, ZipArchive, ZipWriter};

use crate::error::{PackError, PackResult};
use crate::request::ArchiveFormat;
use crate::stat_cache::FileStat;

/// Mode used for synthesized members.
pub const GENERATED_FILE_MODE: u32 = 0o644;

const ZSTD_LEVEL: i32 = 3;
const DEFLATE_LEVEL: i64 = 6;

pub trait ArchiveSink: Send {
    fn append_bytes(&mut self, name: &str, data: &[u8], mode: u32) -> PackResult<()>;

    /// Stream a file from disk; `stat` supplies size and mode.
    fn append_file(&mut self, name: &str, source: &Path, stat: &FileStat) -> PackResult<()>;

    fn append_symlink(&mut self, name: &str, target: &str, mode: u32) -> PackResult<()>;

    /// Write trailers and flush. The archive is valid only once this returns
    /// `Ok`.
    fn finish(self: Box<Self>) -> PackResult<()>;
}

/// Open a sink of the requested format writing into `file`.
///
/// `path` is only used for error context.
pub fn open_sink(
    format: ArchiveFormat,
    file: File,
    path: &Path,
) -> PackResult<Box<dyn ArchiveSink>> {
    Ok(match format {
        ArchiveFormat::Zip => Box::new(ZipSink::new(file, path)?),
        ArchiveFormat::TarZst => Box::new(TarZstSink::new(file, path)?),
    })
}

pub struct ZipSink<W: Write + Seek + Send> {
    zip: ZipWriter<W>,
    path: PathBuf,
    mtime: ZipDateTime,
}

impl<W: Write + Seek + Send> ZipSink<W> {
    pub fn new(writer: W, path: &Path) -> PackResult<Self> {
        let mtime = ZipDateTime::from_date_and_time(1980, 1, 1, 0, 0, 0)
            .map_err(|e| PackError::archive(path, format!("invalid fixed timestamp: {e}")))?;
        Ok(Self {
            zip: ZipWriter::new(writer),
            path: path.to_path_buf(),
            mtime,
        })
    }

    fn options(&self, mode: u32) -> SimpleFileOptions {
        SimpleFileOptions::default()
            .compression_method(CompressionMethod::Deflated)
            .compression_level(Some(DEFLATE_LEVEL))
            .last_modified_time(self.mtime)
            .unix_permissions(mode)
    }

    fn fail(&self, member: &str, e: impl std::fmt::Display) -> PackError {
        PackError::archive(&self.path, format!("member '{member}': {e}"))
    }
}

impl<W: Write + Seek + Send> ArchiveSink for ZipSink<W> {
    fn append_bytes(&mut self, name: &str, data: &[u8], mode: u32) -> PackResult<()> {
        let options = self.options(mode);
        self.zip
            .start_file(name, options)
            .map_err(|e| self.fail(name, e))?;
        self.zip.write_all(data).map_err(|e| self.fail(name, e))
    }

    fn append_file(&mut self, name: &str, source: &Path, stat: &FileStat) -> PackResult<()> {
        let mut file = File::open(source).map_err(|e| PackError::source_io(source, e))?;
        let options = self.options(stat.mode);
        self.zip
            .start_file(name, options)
            .map_err(|e| self.fail(name, e))?;
        io::copy(&mut file, &mut self.zip).map_err(|e| PackError::source_io(source, e))?;
        Ok(())
    }

    fn append_symlink(&mut self, name: &str, target: &str, mode: u32) -> PackResult<()> {
        let options = self.options(mode);
        self.zip
            .add_symlink(name, target, options)
            .map_err(|e| self.fail(name, e))
    }

    fn finish(self: Box<Self>) -> PackResult<()> {
        let ZipSink { zip, path, .. } = *self;
        let mut inner = zip
            .finish()
            .map_err(|e| PackError::archive(&path, format!("finalize failed: {e}")))?;
        inner.flush().map_err(|e| PackError::io(&path, e))
    }
}

pub struct TarZstSink<W: Write + Send> {
    builder: tar::Builder<zstd::stream::Encoder<'static, W>>,
    path: PathBuf,
}

impl<W: Write + Send> TarZstSink<W> {
    pub fn new(writer: W, path: &Path) -> PackResult<Self> {
        let encoder = zstd::stream::Encoder::new(writer, ZSTD_LEVEL)
            .map_err(|e| PackError::io(path, e))?;
        let mut builder = tar::Builder::new(encoder);
        builder.mode(tar::HeaderMode::Deterministic);
        Ok(Self {
            builder,
            path: path.to_path_buf(),
        })
    }

    fn header(entry_type: EntryType, size: u64, mode: u32) -> Header {
        let mut header = Header::new_gnu();
        header.set_entry_type(entry_type);
        header.set_size(size);
        header.set_mtime(0);
        header.set_uid(0);
        header.set_gid(0);
        header.set_mode(mode);
        header
    }

    fn fail(&self, member: &str, e: impl std::fmt::Display) -> PackError {
        PackError::archive(&self.path, format!("member '{member}': {e}"))
    }
}

impl<W: Write + Send> ArchiveSink for TarZstSink<W> {
    fn append_bytes(&mut self, name: &str, data: &[u8], mode: u32) -> PackResult<()> {
        let mut header = Self::header(EntryType::Regular, data.len() as u64, mode);
        self.builder
            .append_data(&mut header, name, data)
            .map_err(|e| self.fail(name, e))
    }

    fn append_file(&mut self, name: &str, source: &Path, stat: &FileStat) -> PackResult<()> {
        let file = File::open(source).map_err(|e| PackError::source_io(source, e))?;
        let mut header = Self::header(EntryType::Regular, stat.len, stat.mode);
        self.builder
            .append_data(&mut header, name, file)
            .map_err(|e| self.fail(name, e))
    }

    fn append_symlink(&mut self, name: &str, target: &str, mode: u32) -> PackResult<()> {
        let mut header = Self::header(EntryType::Symlink, 0, mode);
        header
            .set_link_name(target)
            .map_err(|e| self.fail(name, e))?;
        self.builder
            .append_data(&mut header, name, io::empty())
            .map_err(|e| self.fail(name, e))
    }

    fn finish(self: Box<Self>) -> PackResult<()> {
        let TarZstSink { builder, path } = *self;
        let encoder = builder
            .into_inner()
            .map_err(|e| PackError::archive(&path, format!("finalize tar failed: {e}")))?;
        let mut inner = encoder
            .finish()
            .map_err(|e| PackError::archive(&path, format!("finalize zstd failed: {e}")))?;
        inner.flush().map_err(|e| PackError::io(&path, e))
    }
}

/// Member names of a zip artifact, in archive order.
pub fn list_zip_members(path: &Path) -> PackResult<Vec<String>> {
    let file = File::open(path).map_err(|e| PackError::io(path, e))?;
    let mut archive = ZipArchive::new(file).map_err(|e| PackError::archive(path, e))?;
    let mut names = Vec::with_capacity(archive.len());
    for index in 0..archive.len() {
        let member = archive
            .by_index(index)
            .map_err(|e| PackError::archive(path, e))?;
        names.push(member.name().to_string());
    }
    Ok(names)
}

/// Member names of a tar.zst artifact, in archive order.
pub fn list_tar_zst_members(path: &Path) -> PackResult<Vec<String>> {
    let file = File::open(path).map_err(|e| PackError::io(path, e))?;
    let decoder = zstd::stream::Decoder::new(file).map_err(|e| PackError::io(path, e))?;
    let mut archive = tar::Archive::new(decoder);
    let mut names = Vec::new();
    for entry in archive.entries().map_err(|e| PackError::io(path, e))? {
        let entry = entry.map_err(|e| PackError::io(path, e))?;
        let name = entry.path().map_err(|e| PackError::io(path, e))?;
        names.push(name.to_string_lossy().replace('\\', "/"));
    }
    Ok(names)
}

/// Member names of either archive format.
pub fn list_members(format: ArchiveFormat, path: &Path) -> PackResult<Vec<String>> {
    match format {
        ArchiveFormat::Zip => list_zip_members(path),
        ArchiveFormat::TarZst => list_tar_zst_members(path),
    }
}
