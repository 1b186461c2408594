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

//! Streaming compression and decompression of response bodies

use bytes::Bytes;
use flate2::write::{GzDecoder, GzEncoder, ZlibDecoder, ZlibEncoder};
use flate2::Compression;
use lantern_module_utils::{BodyFilter, CompressionAlgorithm, Error, ErrorType};
use std::io::Write;

enum Coder {
    GzipEncoder(GzEncoder<Vec<u8>>),
    DeflateEncoder(ZlibEncoder<Vec<u8>>),
    GzipDecoder(GzDecoder<Vec<u8>>),
    DeflateDecoder(ZlibDecoder<Vec<u8>>),
}

macro_rules! dispatch {
    ($coder:expr, $inner:ident => $action:expr) => {
        match $coder {
            Coder::GzipEncoder($inner) => $action,
            Coder::DeflateEncoder($inner) => $action,
            Coder::GzipDecoder($inner) => $action,
            Coder::DeflateDecoder($inner) => $action,
        }
    };
}

impl Coder {
    fn write_all(&mut self, data: &[u8]) -> std::io::Result<()> {
        dispatch!(self, coder => coder.write_all(data))
    }

    fn try_finish(&mut self) -> std::io::Result<()> {
        dispatch!(self, coder => coder.try_finish())
    }

    fn take_output(&mut self) -> Vec<u8> {
        dispatch!(self, coder => std::mem::take(coder.get_mut()))
    }
}

/// Body filter compressing or decompressing the response body on the fly
pub struct CompressionFilter {
    coder: Coder,
    algorithm: CompressionAlgorithm,
    encoding: bool,
    bytes_in: usize,
    bytes_out: usize,
    finished: bool,
}

impl std::fmt::Debug for CompressionFilter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CompressionFilter")
            .field("algorithm", &self.algorithm)
            .field("encoding", &self.encoding)
            .field("bytes_in", &self.bytes_in)
            .field("bytes_out", &self.bytes_out)
            .field("finished", &self.finished)
            .finish()
    }
}

impl CompressionFilter {
    /// Creates a filter compressing data with the given algorithm and compression level.
    pub fn encoder(algorithm: CompressionAlgorithm, level: u32) -> Self {
        let level = Compression::new(level.min(9));
        let coder = match algorithm {
            CompressionAlgorithm::Gzip => Coder::GzipEncoder(GzEncoder::new(Vec::new(), level)),
            CompressionAlgorithm::Deflate => {
                Coder::DeflateEncoder(ZlibEncoder::new(Vec::new(), level))
            }
        };
        Self::new(coder, algorithm, true)
    }

    /// Creates a filter decompressing data compressed with the given algorithm.
    pub fn decoder(algorithm: CompressionAlgorithm) -> Self {
        let coder = match algorithm {
            CompressionAlgorithm::Gzip => Coder::GzipDecoder(GzDecoder::new(Vec::new())),
            CompressionAlgorithm::Deflate => Coder::DeflateDecoder(ZlibDecoder::new(Vec::new())),
        };
        Self::new(coder, algorithm, false)
    }

    fn new(coder: Coder, algorithm: CompressionAlgorithm, encoding: bool) -> Self {
        Self {
            coder,
            algorithm,
            encoding,
            bytes_in: 0,
            bytes_out: 0,
            finished: false,
        }
    }

    fn error(&self, err: std::io::Error) -> Box<Error> {
        let context = if self.encoding {
            format!("failed compressing response with {}", self.algorithm)
        } else {
            format!("failed decompressing {} response", self.algorithm)
        };
        Error::because(ErrorType::InternalError, context, err)
    }
}

impl BodyFilter for CompressionFilter {
    fn filter(&mut self, data: Option<Bytes>, end_of_stream: bool) -> Result<Bytes, Box<Error>> {
        if self.finished {
            return Ok(Bytes::new());
        }

        if let Some(data) = data {
            self.bytes_in += data.len();
            self.coder
                .write_all(&data)
                .map_err(|err| self.error(err))?;
        }

        if end_of_stream {
            self.coder.try_finish().map_err(|err| self.error(err))?;
            self.finished = true;
        }

        let output = self.coder.take_output();
        self.bytes_out += output.len();
        Ok(output.into())
    }

    /// Compression ratio as logged by `$gzip_ratio`, only available for compressed responses.
    fn ratio(&self) -> Option<f32> {
        if self.encoding && self.finished && self.bytes_out > 0 {
            Some(self.bytes_in as f32 / self.bytes_out as f32)
        } else {
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use std::io::Read;
    use test_log::test;

    fn run(filter: &mut CompressionFilter, chunks: &[&[u8]]) -> Vec<u8> {
        let mut output = Vec::new();
        for chunk in chunks {
            output.extend_from_slice(
                &filter
                    .filter(Some(Bytes::copy_from_slice(chunk)), false)
                    .unwrap(),
            );
        }
        output.extend_from_slice(&filter.filter(None, true).unwrap());
        output
    }

    #[test]
    fn gzip_encoding() {
        let data = b"Hello, world! ".repeat(200);
        let mut filter = CompressionFilter::encoder(CompressionAlgorithm::Gzip, 6);
        assert_eq!(filter.ratio(), None);

        let compressed = run(&mut filter, &[&data[..1000], &data[1000..]]);
        assert!(compressed.len() < data.len());

        let mut decompressed = Vec::new();
        flate2::read::GzDecoder::new(compressed.as_slice())
            .read_to_end(&mut decompressed)
            .unwrap();
        assert_eq!(decompressed, data);

        let ratio = filter.ratio().unwrap();
        assert!((ratio - data.len() as f32 / compressed.len() as f32).abs() < 0.001);

        // Nothing happens after end of stream
        assert!(filter.filter(Some(Bytes::from_static(b"x")), true).unwrap().is_empty());
    }

    #[test]
    fn deflate_encoding() {
        let data = b"abcdefgh".repeat(500);
        let mut filter = CompressionFilter::encoder(CompressionAlgorithm::Deflate, 9);
        let compressed = run(&mut filter, &[&data]);

        let mut decompressed = Vec::new();
        flate2::read::ZlibDecoder::new(compressed.as_slice())
            .read_to_end(&mut decompressed)
            .unwrap();
        assert_eq!(decompressed, data);
    }

    #[test]
    fn gzip_decoding() {
        let data = b"Some text that was compressed before. ".repeat(100);
        let mut encoder = GzEncoder::new(Vec::new(), Compression::default());
        encoder.write_all(&data).unwrap();
        let compressed = encoder.finish().unwrap();

        let mut filter = CompressionFilter::decoder(CompressionAlgorithm::Gzip);
        let (first, second) = compressed.split_at(compressed.len() / 2);
        assert_eq!(run(&mut filter, &[first, second]), data);
        assert_eq!(filter.ratio(), None);
    }

    #[test]
    fn corrupt_input() {
        let mut filter = CompressionFilter::decoder(CompressionAlgorithm::Gzip);
        let result = filter
            .filter(Some(Bytes::from_static(b"definitely not gzip data")), true)
            .unwrap_err();
        assert_eq!(result.etype, ErrorType::InternalError);
    }
}
