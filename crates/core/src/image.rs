//! Container file format
//!
//! A built project is shipped as a single binary image:
//!
//! ```text
//! +--------------------+
//! | header (16 bytes)  |  magic "ZPLC", version u16, code_size u32,
//! |                    |  task_offset u32, task_count u16
//! +--------------------+
//! | CODE segment       |  concatenated, relocated bytecode
//! +--------------------+
//! | TASK segment       |  task_count records, 16 bytes each
//! +--------------------+
//! ```
//!
//! All multi-byte fields are little-endian. Task records are padded to a
//! fixed 16-byte size so the runtime can index them directly.

use byteorder::{LittleEndian, ReadBytesExt, WriteBytesExt};
use num_enum::{IntoPrimitive, TryFromPrimitive};
use std::fs::File;
use std::io::{self, BufReader, BufWriter, Read, Write};
use std::path::Path;

/// Magic identifier at offset 0.
pub const CONTAINER_MAGIC: [u8; 4] = *b"ZPLC";
/// Container format version this crate reads and writes.
pub const CONTAINER_VERSION: u16 = 1;
/// Fixed header size in bytes.
pub const HEADER_SIZE: u32 = 16;
/// Fixed (padded) task record size in bytes.
pub const TASK_RECORD_SIZE: u32 = 16;

/// Scheduling trigger of a runtime task.
#[derive(Debug, Clone, Copy, PartialEq, Eq, IntoPrimitive, TryFromPrimitive)]
#[repr(u8)]
pub enum TaskType {
    /// Runs every `interval_us` microseconds.
    Cyclic = 0,
    /// Runs when the bound event fires.
    Event = 1,
    /// Runs once at startup, before any cyclic task.
    Init = 2,
}

/// One runtime task record.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TaskRecord {
    pub id: u16,
    pub task_type: TaskType,
    pub priority: u8,
    pub interval_us: u32,
    /// Absolute PC of the task's first program in the CODE segment.
    pub entry_point: u16,
    /// VM stack cells reserved for the task.
    pub stack_size: u16,
}

/// A parsed or about-to-be-written container.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ContainerImage {
    pub code: Vec<u8>,
    pub tasks: Vec<TaskRecord>,
}

/// Errors produced when reading a container.
#[derive(Debug)]
pub enum ImageError {
    Io(io::Error),
    BadMagic([u8; 4]),
    UnsupportedVersion(u16),
    BadTaskType(u8),
    /// Declared segment sizes disagree with the actual byte count.
    Inconsistent(String),
}

impl std::fmt::Display for ImageError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ImageError::Io(e) => write!(f, "I/O error: {}", e),
            ImageError::BadMagic(m) => write!(f, "not a ZPLC image (magic {:02X?})", m),
            ImageError::UnsupportedVersion(v) => write!(f, "unsupported container version {}", v),
            ImageError::BadTaskType(t) => write!(f, "unknown task type {}", t),
            ImageError::Inconsistent(what) => write!(f, "inconsistent container: {}", what),
        }
    }
}

impl std::error::Error for ImageError {}

impl From<io::Error> for ImageError {
    fn from(e: io::Error) -> Self {
        ImageError::Io(e)
    }
}

/// Write a container image.
pub fn write<W: Write>(writer: &mut W, image: &ContainerImage) -> io::Result<()> {
    let code_size = image.code.len() as u32;
    writer.write_all(&CONTAINER_MAGIC)?;
    writer.write_u16::<LittleEndian>(CONTAINER_VERSION)?;
    writer.write_u32::<LittleEndian>(code_size)?;
    writer.write_u32::<LittleEndian>(HEADER_SIZE + code_size)?;
    writer.write_u16::<LittleEndian>(image.tasks.len() as u16)?;
    writer.write_all(&image.code)?;
    for task in &image.tasks {
        writer.write_u16::<LittleEndian>(task.id)?;
        writer.write_u8(task.task_type.into())?;
        writer.write_u8(task.priority)?;
        writer.write_u32::<LittleEndian>(task.interval_us)?;
        writer.write_u16::<LittleEndian>(task.entry_point)?;
        writer.write_u16::<LittleEndian>(task.stack_size)?;
        writer.write_all(&[0u8; 4])?; // pad to TASK_RECORD_SIZE
    }
    Ok(())
}

/// Read and validate a container image.
pub fn read<R: Read>(reader: &mut R) -> Result<ContainerImage, ImageError> {
    let mut magic = [0u8; 4];
    reader.read_exact(&mut magic)?;
    if magic != CONTAINER_MAGIC {
        return Err(ImageError::BadMagic(magic));
    }
    let version = reader.read_u16::<LittleEndian>()?;
    if version != CONTAINER_VERSION {
        return Err(ImageError::UnsupportedVersion(version));
    }
    let code_size = reader.read_u32::<LittleEndian>()?;
    let task_offset = reader.read_u32::<LittleEndian>()?;
    let task_count = reader.read_u16::<LittleEndian>()?;
    if task_offset != HEADER_SIZE + code_size {
        return Err(ImageError::Inconsistent(format!(
            "task segment offset {} does not follow {} code bytes",
            task_offset, code_size
        )));
    }

    let mut code = vec![0u8; code_size as usize];
    reader.read_exact(&mut code)?;

    let mut tasks = Vec::with_capacity(task_count as usize);
    for _ in 0..task_count {
        let id = reader.read_u16::<LittleEndian>()?;
        let raw_type = reader.read_u8()?;
        let task_type = TaskType::try_from(raw_type).map_err(|_| ImageError::BadTaskType(raw_type))?;
        let priority = reader.read_u8()?;
        let interval_us = reader.read_u32::<LittleEndian>()?;
        let entry_point = reader.read_u16::<LittleEndian>()?;
        let stack_size = reader.read_u16::<LittleEndian>()?;
        let mut pad = [0u8; 4];
        reader.read_exact(&mut pad)?;
        tasks.push(TaskRecord {
            id,
            task_type,
            priority,
            interval_us,
            entry_point,
            stack_size,
        });
    }
    Ok(ContainerImage { code, tasks })
}

pub trait ReadImageExt: Read + Sized {
    fn read_zplc_image(&mut self) -> Result<ContainerImage, ImageError> {
        read(self)
    }
}

impl<R: Read + Sized> ReadImageExt for R {}

pub trait WriteImageExt: Write + Sized {
    fn write_zplc_image(&mut self, image: &ContainerImage) -> io::Result<()> {
        write(self, image)
    }
}

impl<W: Write + Sized> WriteImageExt for W {}

pub fn read_file<P: AsRef<Path>>(path: P) -> Result<ContainerImage, ImageError> {
    BufReader::new(File::open(path)?).read_zplc_image()
}

pub fn write_file<P: AsRef<Path>>(path: P, image: &ContainerImage) -> io::Result<()> {
    let mut writer = BufWriter::new(File::create(path)?);
    writer.write_zplc_image(image)?;
    writer.flush()
}
