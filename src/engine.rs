use anyhow::{Context, Result};
use flate2::read::MultiGzDecoder;
use futures::stream::StreamExt;
use std::{
    fs,
    io::{BufRead, BufReader, Read},
    path::{Path, PathBuf},
    time::Duration,
};
use tracing::{error, info, warn};

// GENERALISED FUNCTIONS

/// HTTP client shared by the JSON fetchers
pub fn http_client(user_agent: &str, accept_invalid_certs: bool) -> Result<reqwest::Client> {
    reqwest::Client::builder()
        .user_agent(user_agent)
        .danger_accept_invalid_certs(accept_invalid_certs)
        .timeout(Duration::from_secs(300))
        .build()
        .context("failed to build HTTP client")
}

/// GET `url` and decode the JSON body into `T`
pub async fn fetch_json<T: serde::de::DeserializeOwned>(
    client: &reqwest::Client,
    url: &str,
) -> Result<T> {
    info!("requesting {} ...", url);
    let response = client
        .get(url)
        .send()
        .await
        .and_then(|r| r.error_for_status())
        .with_context(|| format!("unable to retrieve {url}"))?;
    response
        .json::<T>()
        .await
        .with_context(|| format!("unexpected JSON from {url}"))
}

/// Downloads every `(url, destination)` pair with at most `n_threads`
/// requests in flight. Returns how many downloads failed; failures are logged.
pub async fn bulk_url_download(
    downloads: Vec<(String, PathBuf)>,
    user_agent: &str,
    n_threads: usize,
) -> usize {
    let client = reqwest::Client::new();
    let results = futures::stream::iter(downloads.into_iter().map(|(url, dest)| {
        // model the request as a Future
        let request = client
            .get(&url)
            .header(reqwest::header::USER_AGENT, user_agent)
            .send();

        async move {
            info!("requesting {} ...", url);
            let response = match request.await.and_then(|r| r.error_for_status()) {
                Ok(response) => response,
                Err(e) => {
                    error!("unable to download {}: {}", url, e);
                    return false;
                }
            };

            let bytes: bytes::Bytes = match response.bytes().await {
                Ok(bytes) => bytes,
                Err(e) => {
                    error!("unable to read body of {}: {}", url, e);
                    return false;
                }
            };

            match tokio::fs::write(&dest, &bytes).await {
                Ok(()) => {
                    info!("file written: {} ({} bytes)", dest.display(), bytes.len());
                    true
                }
                Err(e) => {
                    error!("unable to write {}: {}", dest.display(), e);
                    false
                }
            }
        }
    }))
    .buffer_unordered(n_threads.max(1))
    .collect::<Vec<bool>>()
    .await;

    results.into_iter().filter(|ok| !ok).count()
}

/// Extracts a zip archive into `target_dir`, flattening its top directory
pub fn unzip(zip_file_path: &Path, target_dir: &Path) -> Result<()> {
    let file = fs::File::open(zip_file_path)
        .with_context(|| format!("unable to open {}", zip_file_path.display()))?;
    zip_extract::extract(BufReader::new(file), target_dir, true).with_context(|| {
        format!(
            "could not extract {} to {}",
            zip_file_path.display(),
            target_dir.display()
        )
    })?;
    info!("extracted {}", zip_file_path.display());
    Ok(())
}

/// Reads a JSON file into `T`
pub fn read_json_file<T: serde::de::DeserializeOwned>(file_path: &Path) -> Result<T> {
    let mut file = fs::File::open(file_path)
        .with_context(|| format!("unable to open {}", file_path.display()))?;
    let mut file_str = String::new();
    file.read_to_string(&mut file_str)?;

    let json: T = serde_json::from_str(&file_str)
        .with_context(|| format!("invalid JSON in {}", file_path.display()))?;
    Ok(json)
}

/// Line iterator over a text file that decodes invalid UTF-8 lossily.
/// Files ending in `.gz` are decompressed on the fly.
pub struct LossyLines {
    reader: Box<dyn BufRead + Send>,
    buf: Vec<u8>,
    label: String,
}

impl Iterator for LossyLines {
    type Item = String;

    fn next(&mut self) -> Option<String> {
        self.buf.clear();
        match self.reader.read_until(b'\n', &mut self.buf) {
            Ok(0) => None,
            Ok(_) => {
                while matches!(self.buf.last(), Some(b'\n' | b'\r')) {
                    self.buf.pop();
                }
                Some(String::from_utf8_lossy(&self.buf).into_owned())
            }
            Err(e) => {
                // a truncated archive ends the stream; records so far are kept
                warn!("read error in {}, stopping: {}", self.label, e);
                None
            }
        }
    }
}

pub fn read_lines(path: &Path) -> Result<LossyLines> {
    let file =
        fs::File::open(path).with_context(|| format!("unable to open {}", path.display()))?;
    Ok(lines_from_reader(file, is_gzip(path), path.display().to_string()))
}

/// Raw reader over a file, decompressing `.gz` files
pub fn open_maybe_gzip(path: &Path) -> Result<Box<dyn Read + Send>> {
    let file =
        fs::File::open(path).with_context(|| format!("unable to open {}", path.display()))?;
    if is_gzip(path) {
        Ok(Box::new(MultiGzDecoder::new(BufReader::new(file))))
    } else {
        Ok(Box::new(BufReader::new(file)))
    }
}

pub fn lines_from_reader<R: Read + Send + 'static>(reader: R, gzip: bool, label: String) -> LossyLines {
    let reader: Box<dyn BufRead + Send> = if gzip {
        Box::new(BufReader::new(MultiGzDecoder::new(reader)))
    } else {
        Box::new(BufReader::new(reader))
    };
    LossyLines {
        reader,
        buf: Vec::new(),
        label,
    }
}

pub fn is_gzip(path: &Path) -> bool {
    path.extension().map_or(false, |ext| ext.eq_ignore_ascii_case("gz"))
}

/// Cuts `value` to at most `max` characters
pub fn truncate_chars(value: &str, max: usize) -> String {
    match value.char_indices().nth(max) {
        Some((idx, _)) => value[..idx].to_string(),
        None => value.to_string(),
    }
}

pub fn strip_non_ascii(value: &str) -> String {
    value.chars().filter(char::is_ascii).collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use flate2::{write::GzEncoder, Compression};
    use std::io::Write;

    #[test]
    fn plain_lines_strip_line_endings() {
        let lines: Vec<String> =
            lines_from_reader(&b"a\r\nb\n\nc"[..], false, "mem".into()).collect();
        assert_eq!(lines, vec!["a", "b", "", "c"]);
    }

    #[test]
    fn invalid_utf8_is_replaced() {
        let lines: Vec<String> =
            lines_from_reader(&b"descr: caf\xe9\n"[..], false, "mem".into()).collect();
        assert_eq!(lines, vec!["descr: caf\u{fffd}"]);
    }

    #[test]
    fn gzip_file_by_extension() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("radb.db.gz");
        let mut encoder = GzEncoder::new(fs::File::create(&path).unwrap(), Compression::default());
        encoder.write_all(b"route: 192.0.2.0/24\norigin: AS64500\n").unwrap();
        encoder.finish().unwrap();

        let lines: Vec<String> = read_lines(&path).unwrap().collect();
        assert_eq!(lines, vec!["route: 192.0.2.0/24", "origin: AS64500"]);
    }

    #[test]
    fn missing_file_is_an_error() {
        assert!(read_lines(Path::new("/nonexistent/file.db")).is_err());
    }

    #[test]
    fn json_file_into_type() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("data.json");
        fs::write(&path, r#"{"a": [1, 2]}"#).unwrap();
        let value: std::collections::HashMap<String, Vec<u32>> = read_json_file(&path).unwrap();
        assert_eq!(value["a"], vec![1, 2]);
    }

    #[test]
    fn truncation_counts_characters() {
        assert_eq!(truncate_chars("abcdef", 3), "abc");
        assert_eq!(truncate_chars("ab", 3), "ab");
        assert_eq!(truncate_chars("ééé", 2), "éé");
        assert_eq!(strip_non_ascii("São Paulo"), "So Paulo");
    }
}
