use std::fs;
use std::io::{self, Write};
use std::os::unix::net::UnixStream;
use std::path::Path;

use crate::direct_fs::DirectFs;
use crate::error::FileError;
use crate::fileops::FileBackend;
use crate::helper_proto::{read_frame, write_frame, RemoteEntry, Request, Response};

/// Request loop of the privileged helper process. Runs with plain
/// filesystem authority; the client side is `HelperConnection`. Returns
/// once the peer hangs up.
pub fn serve(mut stream: UnixStream) -> io::Result<()> {
    let backend = DirectFs;
    loop {
        let frame = match read_frame(&mut stream) {
            Ok(frame) => frame,
            Err(err) if err.kind() == io::ErrorKind::UnexpectedEof => return Ok(()),
            Err(err) => return Err(err),
        };
        let request: Request = match serde_json::from_slice(&frame) {
            Ok(request) => request,
            Err(err) => {
                let response = Response::Err {
                    code: crate::helper_proto::RemoteErrorCode::InvalidArgument,
                    message: format!("bad request: {err}"),
                };
                send(&mut stream, &response)?;
                continue;
            }
        };
        let response = match request {
            Request::CreateFromStream { dir, filename } => {
                receive_stream(&mut stream, &dir, &filename)
            }
            other => execute(&backend, other),
        };
        send(&mut stream, &response)?;
    }
}

fn send(stream: &mut UnixStream, response: &Response) -> io::Result<()> {
    let bytes = serde_json::to_vec(response)
        .map_err(|err| io::Error::new(io::ErrorKind::InvalidData, err))?;
    write_frame(stream, &bytes)
}

fn execute(backend: &DirectFs, request: Request) -> Response {
    match request {
        Request::Ping => Response::Ok,
        Request::CopyFile { src, dest } => unit(backend.copy_file(&src, &dest)),
        Request::MoveFile { src, dest } => unit(backend.move_file(&src, &dest)),
        Request::Delete { path } => unit(backend.delete(&path)),
        Request::WriteText {
            dir,
            filename,
            content,
        } => unit(backend.write_text(&dir, &filename, &content)),
        Request::ReadToString { path } => match backend.read_to_string(&path) {
            Ok(value) => Response::Text { value },
            Err(err) => Response::from_file_error(&err),
        },
        Request::ListNames { dir } => match backend.list_names(&dir) {
            Ok(value) => Response::Names { value },
            Err(err) => Response::from_file_error(&err),
        },
        Request::ListEntries { dir } => match backend.list_entries(&dir) {
            Ok(entries) => Response::Entries {
                value: entries
                    .into_iter()
                    .map(|entry| RemoteEntry {
                        name: entry.name,
                        path: entry.path,
                        is_dir: entry.is_dir,
                        len: entry.len,
                        modified: entry.modified,
                    })
                    .collect(),
            },
            Err(err) => Response::from_file_error(&err),
        },
        Request::CreateDir { path } => unit(backend.create_dir(&path)),
        Request::Rename { path, new_name } => unit(backend.rename(&path, &new_name)),
        Request::Md5 { path } => match backend.md5(&path) {
            Ok(value) => Response::Text { value },
            Err(err) => Response::from_file_error(&err),
        },
        Request::Exists { path } => match backend.exists(&path) {
            Ok(value) => Response::Bool { value },
            Err(err) => Response::from_file_error(&err),
        },
        Request::IsFile { path } => match backend.is_file(&path) {
            Ok(value) => Response::Bool { value },
            Err(err) => Response::from_file_error(&err),
        },
        Request::LastModified { path } => match backend.last_modified(&path) {
            Ok(value) => Response::Stamp { value },
            Err(err) => Response::from_file_error(&err),
        },
        Request::FileSize { path } => match backend.file_size(&path) {
            Ok(value) => Response::Size { value },
            Err(err) => Response::from_file_error(&err),
        },
        Request::CreateFromStream { .. } => Response::Err {
            code: crate::helper_proto::RemoteErrorCode::InvalidArgument,
            message: "stream request outside stream handler".to_string(),
        },
    }
}

fn unit(result: Result<(), FileError>) -> Response {
    match result {
        Ok(()) => Response::Ok,
        Err(err) => Response::from_file_error(&err),
    }
}

/// Drains payload frames into `dir/filename`. The payload is always fully
/// consumed so a write failure does not desynchronize the wire.
fn receive_stream(stream: &mut UnixStream, dir: &Path, filename: &str) -> Response {
    let prepared = fs::create_dir_all(dir)
        .map_err(|err| FileError::from_io(err, dir, FileError::CreateDirFailed))
        .and_then(|()| {
            let dest = dir.join(filename);
            fs::File::create(&dest)
                .map_err(|err| FileError::from_io(err, &dest, FileError::WriteFailed))
        });

    let (mut file, mut failure) = match prepared {
        Ok(file) => (Some(file), None),
        Err(err) => (None, Some(err)),
    };

    loop {
        let chunk = match read_frame(stream) {
            Ok(chunk) => chunk,
            Err(err) => {
                return Response::from_file_error(&FileError::ReadFailed(format!(
                    "payload stream: {err}"
                )))
            }
        };
        if chunk.is_empty() {
            break;
        }
        if failure.is_some() {
            continue;
        }
        if let Some(file) = file.as_mut() {
            if let Err(err) = file.write_all(&chunk) {
                failure = Some(FileError::from_io(
                    err,
                    &dir.join(filename),
                    FileError::WriteFailed,
                ));
            }
        }
    }

    match failure {
        Some(err) => Response::from_file_error(&err),
        None => Response::Ok,
    }
}
