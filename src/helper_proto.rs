use serde::{Deserialize, Serialize};
use std::io::{self, Read, Write};
use std::path::PathBuf;

use crate::error::FileError;

/// Frames on the helper wire are a 4-byte big-endian length followed by
/// that many bytes. Control frames carry JSON; payload frames carry raw
/// bytes, with a zero-length frame terminating a payload stream.
pub const MAX_FRAME_LEN: u32 = 16 * 1024 * 1024;

/// Chunk size the client pumps payload bytes with. Deliberately larger
/// than the OS pipe buffer so a blocked reader is felt immediately.
pub const STREAM_CHUNK_LEN: usize = 256 * 1024;

pub fn write_frame(writer: &mut impl Write, bytes: &[u8]) -> io::Result<()> {
    let len = bytes.len() as u32;
    writer.write_all(&len.to_be_bytes())?;
    writer.write_all(bytes)?;
    writer.flush()
}

pub fn read_frame(reader: &mut impl Read) -> io::Result<Vec<u8>> {
    let mut len_buf = [0u8; 4];
    reader.read_exact(&mut len_buf)?;
    let len = u32::from_be_bytes(len_buf);
    if len > MAX_FRAME_LEN {
        return Err(io::Error::new(
            io::ErrorKind::InvalidData,
            format!("frame too large: {len}"),
        ));
    }
    let mut bytes = vec![0u8; len as usize];
    reader.read_exact(&mut bytes)?;
    Ok(bytes)
}

#[derive(Debug, Serialize, Deserialize)]
#[serde(tag = "op", rename_all = "snake_case")]
pub enum Request {
    Ping,
    CopyFile { src: PathBuf, dest: PathBuf },
    MoveFile { src: PathBuf, dest: PathBuf },
    Delete { path: PathBuf },
    WriteText { dir: PathBuf, filename: String, content: String },
    ReadToString { path: PathBuf },
    ListNames { dir: PathBuf },
    ListEntries { dir: PathBuf },
    CreateDir { path: PathBuf },
    Rename { path: PathBuf, new_name: String },
    Md5 { path: PathBuf },
    Exists { path: PathBuf },
    IsFile { path: PathBuf },
    LastModified { path: PathBuf },
    FileSize { path: PathBuf },
    /// Followed by raw payload frames, zero-length frame terminated.
    CreateFromStream { dir: PathBuf, filename: String },
}

#[derive(Debug, Serialize, Deserialize)]
#[serde(tag = "result", rename_all = "snake_case")]
pub enum Response {
    Ok,
    Bool { value: bool },
    Text { value: String },
    Names { value: Vec<String> },
    Entries { value: Vec<RemoteEntry> },
    Stamp { value: i64 },
    Size { value: u64 },
    Err { code: RemoteErrorCode, message: String },
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RemoteEntry {
    pub name: String,
    pub path: PathBuf,
    pub is_dir: bool,
    pub len: u64,
    pub modified: i64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RemoteErrorCode {
    PermissionDenied,
    NotFound,
    CopyFailed,
    DeleteFailed,
    MoveFailed,
    CreateDirFailed,
    ReadFailed,
    WriteFailed,
    InvalidArgument,
    Unknown,
}

impl Response {
    pub fn from_file_error(err: &FileError) -> Self {
        let (code, message) = match err {
            FileError::PermissionDenied(m) => (RemoteErrorCode::PermissionDenied, m.clone()),
            FileError::NotFound(m) => (RemoteErrorCode::NotFound, m.clone()),
            FileError::CopyFailed(m) => (RemoteErrorCode::CopyFailed, m.clone()),
            FileError::DeleteFailed(m) => (RemoteErrorCode::DeleteFailed, m.clone()),
            FileError::MoveFailed(m) => (RemoteErrorCode::MoveFailed, m.clone()),
            FileError::CreateDirFailed(m) => (RemoteErrorCode::CreateDirFailed, m.clone()),
            FileError::ReadFailed(m) => (RemoteErrorCode::ReadFailed, m.clone()),
            FileError::WriteFailed(m) => (RemoteErrorCode::WriteFailed, m.clone()),
            FileError::HelperDisconnected(m) | FileError::Unknown(m) => {
                (RemoteErrorCode::Unknown, m.clone())
            }
        };
        Response::Err { code, message }
    }
}

/// The client-side mirror of `Response::from_file_error`.
pub fn file_error_from_remote(code: RemoteErrorCode, message: String) -> FileError {
    match code {
        RemoteErrorCode::PermissionDenied => FileError::PermissionDenied(message),
        RemoteErrorCode::NotFound => FileError::NotFound(message),
        RemoteErrorCode::CopyFailed => FileError::CopyFailed(message),
        RemoteErrorCode::DeleteFailed => FileError::DeleteFailed(message),
        RemoteErrorCode::MoveFailed => FileError::MoveFailed(message),
        RemoteErrorCode::CreateDirFailed => FileError::CreateDirFailed(message),
        RemoteErrorCode::ReadFailed => FileError::ReadFailed(message),
        RemoteErrorCode::WriteFailed => FileError::WriteFailed(message),
        RemoteErrorCode::InvalidArgument | RemoteErrorCode::Unknown => FileError::Unknown(message),
    }
}
