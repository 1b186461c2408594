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

//! MIME type lookup by file extension

use std::collections::HashMap;
use std::path::Path;

/// The built-in MIME table with configured overrides
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MimeTypes {
    overrides: HashMap<String, String>,
    default_type: String,
}

impl MimeTypes {
    /// Creates the table. Extensions in `overrides` are matched case-insensitively, a leading dot
    /// is ignored.
    pub fn new(overrides: &HashMap<String, String>, default_type: &str) -> Self {
        Self {
            overrides: overrides
                .iter()
                .map(|(ext, mime)| {
                    (
                        ext.trim_start_matches('.').to_ascii_lowercase(),
                        mime.clone(),
                    )
                })
                .collect(),
            default_type: default_type.to_owned(),
        }
    }

    /// Determines the MIME type of a file from its extension.
    pub fn content_type(&self, path: &Path) -> String {
        let ext = path
            .extension()
            .and_then(|ext| ext.to_str())
            .map(str::to_ascii_lowercase);
        if let Some(mime) = ext.as_ref().and_then(|ext| self.overrides.get(ext)) {
            return mime.clone();
        }

        mime_guess::from_path(path)
            .first_raw()
            .map_or_else(|| self.default_type.clone(), str::to_owned)
    }
}

impl Default for MimeTypes {
    fn default() -> Self {
        Self::new(&HashMap::new(), crate::configuration::DEFAULT_TYPE)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn lookup() {
        let mut overrides = HashMap::new();
        overrides.insert(".JSON".to_owned(), "application/vnd.goes+json".to_owned());
        overrides.insert("nc".to_owned(), "application/x-netcdf".to_owned());
        let types = MimeTypes::new(&overrides, "text/plain");

        assert_eq!(types.content_type(Path::new("/a/logo.png")), "image/png");
        assert_eq!(types.content_type(Path::new("index.html")), "text/html");
        assert_eq!(
            types.content_type(Path::new("metadata.json")),
            "application/vnd.goes+json"
        );
        assert_eq!(types.content_type(Path::new("scan.NC")), "application/x-netcdf");
        assert_eq!(types.content_type(Path::new("README")), "text/plain");
        assert_eq!(types.content_type(Path::new("x.unknown-ext")), "text/plain");

        assert_eq!(
            MimeTypes::default().content_type(Path::new("x.unknown-ext")),
            "application/octet-stream"
        );
    }
}
