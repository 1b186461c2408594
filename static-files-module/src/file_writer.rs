// Copyright 2024 Wladimir Palant
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
// http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

//! Streaming file contents into the response body

use bytes::BytesMut;
use lantern_module_utils::{Error, ErrorType, Session};
use log::error;
use std::cmp::min;
use std::io::SeekFrom;
use std::path::Path;
use tokio::fs::File;
use tokio::io::{AsyncReadExt, AsyncSeekExt};

const BUFFER_SIZE: usize = 64 * 1024;

/// Writes `len` bytes of the file starting at `start` as response body and ends the response.
pub(crate) async fn file_response(
    session: &mut Session<'_>,
    path: &Path,
    start: u64,
    len: u64,
) -> Result<(), Box<Error>> {
    let mut file = File::open(path).await.map_err(|err| {
        error!("failed opening file {path:?}: {err}");
        Error::because(ErrorType::FileOpenError, format!("failed opening {path:?}"), err)
    })?;

    if start != 0 {
        file.seek(SeekFrom::Start(start)).await.map_err(|err| {
            error!("failed seeking in file {path:?}: {err}");
            Error::because(ErrorType::FileReadError, format!("failed seeking in {path:?}"), err)
        })?;
    }

    let mut remaining = len;
    while remaining > 0 {
        let mut buf = BytesMut::zeroed(min(remaining, BUFFER_SIZE as u64) as usize);
        let read = file.read(buf.as_mut()).await.map_err(|err| {
            error!("failed reading data from {path:?}: {err}");
            Error::because(ErrorType::FileReadError, format!("failed reading {path:?}"), err)
        })?;

        if read == 0 {
            error!("file {path:?} ended with {remaining} bytes left to be written");
            return Err(Error::explain(
                ErrorType::FileReadError,
                "file shorter than expected",
            ));
        }

        buf.truncate(read);
        remaining -= read as u64;
        session
            .write_response_body(Some(buf.freeze()), remaining == 0)
            .await?;
    }

    if !session.is_finished() {
        session.write_response_body(None, true).await?;
    }

    Ok(())
}
