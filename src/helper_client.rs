use std::io::Read;
use std::os::unix::net::UnixStream;
use std::path::Path;
use std::sync::Mutex;
use std::thread;

use crate::access::AccessTier;
use crate::error::{FileError, PermissionError};
use crate::fileops::{FileBackend, FileEntry};
use crate::helper_proto::{
    file_error_from_remote, read_frame, write_frame, Request, Response, STREAM_CHUNK_LEN,
};

/// Connection to the privileged helper process. Explicit lifecycle: the
/// composition root connects once, hands the connection to the router, and
/// every call after a disconnect fails with a typed `HelperDisconnected`
/// instead of an implicit null.
pub struct HelperConnection {
    stream: Mutex<Option<UnixStream>>,
}

impl HelperConnection {
    pub fn connect(socket_path: &Path) -> Result<Self, PermissionError> {
        let stream =
            UnixStream::connect(socket_path).map_err(|_| PermissionError::HelperUnavailable)?;
        let connection = Self {
            stream: Mutex::new(Some(stream)),
        };
        match connection.call(&Request::Ping) {
            Ok(Response::Ok) => Ok(connection),
            Ok(_) | Err(_) => Err(PermissionError::HelperUnavailable),
        }
    }

    /// Wraps an already-established channel to the helper.
    pub fn from_stream(stream: UnixStream) -> Self {
        Self {
            stream: Mutex::new(Some(stream)),
        }
    }

    pub fn disconnect(&self) {
        self.stream.lock().expect("helper stream poisoned").take();
    }

    pub fn is_connected(&self) -> bool {
        self.stream
            .lock()
            .expect("helper stream poisoned")
            .is_some()
    }

    fn call(&self, request: &Request) -> Result<Response, FileError> {
        let mut guard = self.stream.lock().expect("helper stream poisoned");
        let stream = guard
            .as_mut()
            .ok_or_else(|| FileError::HelperDisconnected("not connected".to_string()))?;
        let bytes = serde_json::to_vec(request)
            .map_err(|err| FileError::Unknown(format!("encode request: {err}")))?;
        let result = match write_frame(&mut *stream, &bytes) {
            Ok(()) => read_frame(&mut *stream),
            Err(err) => Err(err),
        };
        let frame = match result {
            Ok(frame) => frame,
            Err(err) => {
                guard.take();
                return Err(FileError::HelperDisconnected(err.to_string()));
            }
        };
        serde_json::from_slice(&frame)
            .map_err(|err| FileError::Unknown(format!("decode response: {err}")))
    }

    /// Sends a request whose payload follows as raw frames. The pump runs on
    /// its own thread: the OS socket buffer is bounded (tens of KB), and the
    /// response read on this thread must never wait behind the payload write.
    fn call_streaming(
        &self,
        request: &Request,
        mut reader: Box<dyn Read + Send>,
    ) -> Result<Response, FileError> {
        let mut guard = self.stream.lock().expect("helper stream poisoned");
        let stream = guard
            .as_mut()
            .ok_or_else(|| FileError::HelperDisconnected("not connected".to_string()))?;
        let bytes = serde_json::to_vec(request)
            .map_err(|err| FileError::Unknown(format!("encode request: {err}")))?;
        if let Err(err) = write_frame(&mut *stream, &bytes) {
            guard.take();
            return Err(FileError::HelperDisconnected(err.to_string()));
        }

        let mut write_half = match stream.try_clone() {
            Ok(half) => half,
            Err(err) => {
                guard.take();
                return Err(FileError::HelperDisconnected(err.to_string()));
            }
        };
        let pump = thread::spawn(move || -> std::io::Result<()> {
            let mut chunk = vec![0u8; STREAM_CHUNK_LEN];
            loop {
                let read = reader.read(&mut chunk)?;
                write_frame(&mut write_half, &chunk[..read])?;
                if read == 0 {
                    return Ok(());
                }
            }
        });

        let frame = match read_frame(&mut *stream) {
            Ok(frame) => frame,
            Err(err) => {
                guard.take();
                let _ = pump.join();
                return Err(FileError::HelperDisconnected(err.to_string()));
            }
        };
        let pumped = pump
            .join()
            .map_err(|_| FileError::WriteFailed("payload pump panicked".to_string()))?;
        let response: Response = serde_json::from_slice(&frame)
            .map_err(|err| FileError::Unknown(format!("decode response: {err}")))?;
        if let Err(err) = pumped {
            if !matches!(response, Response::Err { .. }) {
                return Err(FileError::WriteFailed(format!("payload pump: {err}")));
            }
        }
        Ok(response)
    }
}

/// The privileged implementor of the backend trait: every capability is
/// marshaled to the helper process.
pub struct HelperFs {
    connection: HelperConnection,
}

impl HelperFs {
    pub fn new(connection: HelperConnection) -> Self {
        Self { connection }
    }

    fn expect_ok(&self, request: &Request) -> Result<(), FileError> {
        match self.connection.call(request)? {
            Response::Ok => Ok(()),
            Response::Err { code, message } => Err(file_error_from_remote(code, message)),
            other => Err(unexpected(&other)),
        }
    }

    fn expect_bool(&self, request: &Request) -> Result<bool, FileError> {
        match self.connection.call(request)? {
            Response::Bool { value } => Ok(value),
            Response::Err { code, message } => Err(file_error_from_remote(code, message)),
            other => Err(unexpected(&other)),
        }
    }

    fn expect_text(&self, request: &Request) -> Result<String, FileError> {
        match self.connection.call(request)? {
            Response::Text { value } => Ok(value),
            Response::Err { code, message } => Err(file_error_from_remote(code, message)),
            other => Err(unexpected(&other)),
        }
    }
}

fn unexpected(response: &Response) -> FileError {
    FileError::Unknown(format!("unexpected helper response: {response:?}"))
}

impl FileBackend for HelperFs {
    fn tier(&self) -> AccessTier {
        AccessTier::Privileged
    }

    fn copy_file(&self, src: &Path, dest: &Path) -> Result<(), FileError> {
        self.expect_ok(&Request::CopyFile {
            src: src.to_path_buf(),
            dest: dest.to_path_buf(),
        })
    }

    fn move_file(&self, src: &Path, dest: &Path) -> Result<(), FileError> {
        self.expect_ok(&Request::MoveFile {
            src: src.to_path_buf(),
            dest: dest.to_path_buf(),
        })
    }

    fn delete(&self, path: &Path) -> Result<(), FileError> {
        self.expect_ok(&Request::Delete {
            path: path.to_path_buf(),
        })
    }

    fn write_text(&self, dir: &Path, filename: &str, content: &str) -> Result<(), FileError> {
        self.expect_ok(&Request::WriteText {
            dir: dir.to_path_buf(),
            filename: filename.to_string(),
            content: content.to_string(),
        })
    }

    fn read_to_string(&self, path: &Path) -> Result<String, FileError> {
        self.expect_text(&Request::ReadToString {
            path: path.to_path_buf(),
        })
    }

    fn list_names(&self, dir: &Path) -> Result<Vec<String>, FileError> {
        match self.connection.call(&Request::ListNames {
            dir: dir.to_path_buf(),
        })? {
            Response::Names { value } => Ok(value),
            Response::Err { code, message } => Err(file_error_from_remote(code, message)),
            other => Err(unexpected(&other)),
        }
    }

    fn list_entries(&self, dir: &Path) -> Result<Vec<FileEntry>, FileError> {
        match self.connection.call(&Request::ListEntries {
            dir: dir.to_path_buf(),
        })? {
            Response::Entries { value } => Ok(value
                .into_iter()
                .map(|entry| FileEntry {
                    name: entry.name,
                    path: entry.path,
                    is_dir: entry.is_dir,
                    len: entry.len,
                    modified: entry.modified,
                })
                .collect()),
            Response::Err { code, message } => Err(file_error_from_remote(code, message)),
            other => Err(unexpected(&other)),
        }
    }

    fn create_dir(&self, path: &Path) -> Result<(), FileError> {
        self.expect_ok(&Request::CreateDir {
            path: path.to_path_buf(),
        })
    }

    fn rename(&self, path: &Path, new_name: &str) -> Result<(), FileError> {
        self.expect_ok(&Request::Rename {
            path: path.to_path_buf(),
            new_name: new_name.to_string(),
        })
    }

    fn md5(&self, path: &Path) -> Result<String, FileError> {
        self.expect_text(&Request::Md5 {
            path: path.to_path_buf(),
        })
    }

    fn exists(&self, path: &Path) -> Result<bool, FileError> {
        self.expect_bool(&Request::Exists {
            path: path.to_path_buf(),
        })
    }

    fn is_file(&self, path: &Path) -> Result<bool, FileError> {
        self.expect_bool(&Request::IsFile {
            path: path.to_path_buf(),
        })
    }

    fn last_modified(&self, path: &Path) -> Result<i64, FileError> {
        match self.connection.call(&Request::LastModified {
            path: path.to_path_buf(),
        })? {
            Response::Stamp { value } => Ok(value),
            Response::Err { code, message } => Err(file_error_from_remote(code, message)),
            other => Err(unexpected(&other)),
        }
    }

    fn file_size(&self, path: &Path) -> Result<u64, FileError> {
        match self.connection.call(&Request::FileSize {
            path: path.to_path_buf(),
        })? {
            Response::Size { value } => Ok(value),
            Response::Err { code, message } => Err(file_error_from_remote(code, message)),
            other => Err(unexpected(&other)),
        }
    }

    fn create_from_stream(
        &self,
        dir: &Path,
        filename: &str,
        reader: Box<dyn Read + Send>,
    ) -> Result<(), FileError> {
        let request = Request::CreateFromStream {
            dir: dir.to_path_buf(),
            filename: filename.to_string(),
        };
        match self.connection.call_streaming(&request, reader)? {
            Response::Ok => Ok(()),
            Response::Err { code, message } => Err(file_error_from_remote(code, message)),
            other => Err(unexpected(&other)),
        }
    }
}
