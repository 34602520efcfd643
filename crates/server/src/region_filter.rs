//! External region filtering for alignment payloads.
//!
//! `index=bai` downloads are answered by an external `samtools view` run
//! against the payload file. Its stdout becomes the response body verbatim.

use crate::error::{ApiError, ApiResult};
use crate::metrics;
use crate::streamer::{BodyStream, StreamError};
use async_trait::async_trait;
use futures::StreamExt;
use std::path::PathBuf;
use std::process::Stdio;
use tokio::io::AsyncReadExt;
use tokio::process::Command;
use tokio_util::io::ReaderStream;

/// Longest stderr excerpt kept for error messages.
const MAX_STDERR_LEN: usize = 4096;

/// One region query against a payload file.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct RegionRequest {
    pub path: PathBuf,
    pub region: Option<String>,
    /// Validated tool arguments, see [`parse_samtools_args`].
    pub args: Vec<String>,
}

/// Produces a filtered body for a region query.
#[async_trait]
pub trait RegionFilter: Send + Sync + 'static {
    /// Start the filter. Fails only if no output can be produced at all;
    /// failures after the first byte terminate the returned stream.
    async fn run(&self, request: RegionRequest) -> Result<BodyStream, StreamError>;
}

/// [`RegionFilter`] backed by the samtools binary.
#[derive(Clone, Debug)]
pub struct SamtoolsFilter {
    binary: PathBuf,
}

impl SamtoolsFilter {
    pub fn new(binary: impl Into<PathBuf>) -> Self {
        Self {
            binary: binary.into(),
        }
    }

    fn command(&self, request: &RegionRequest) -> Command {
        let mut cmd = Command::new(&self.binary);
        cmd.arg("view")
            .args(&request.args)
            .arg(&request.path)
            .args(request.region.iter())
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        cmd
    }
}

#[async_trait]
impl RegionFilter for SamtoolsFilter {
    async fn run(&self, request: RegionRequest) -> Result<BodyStream, StreamError> {
        let mut child = self.command(&request).spawn().map_err(|e| {
            metrics::REGION_FILTER_FAILURES.inc();
            StreamError::Spawn(format!("{}: {e}", self.binary.display()))
        })?;

        let (Some(stdout), Some(mut stderr)) = (child.stdout.take(), child.stderr.take()) else {
            return Err(StreamError::Spawn("child pipes unavailable".to_string()));
        };

        // Drained concurrently so a chatty process never blocks on a full pipe.
        let stderr_task = tokio::spawn(async move {
            let mut buf = Vec::new();
            let _ = stderr.read_to_end(&mut buf).await;
            buf.truncate(MAX_STDERR_LEN);
            String::from_utf8_lossy(&buf).into_owned()
        });

        let mut stdout = ReaderStream::new(stdout);
        let first = match stdout.next().await {
            Some(Ok(chunk)) => Some(chunk),
            Some(Err(e)) => return Err(StreamError::Io(e)),
            None => None,
        };

        if first.is_none() {
            let status = child.wait().await?;
            let stderr = stderr_task.await.unwrap_or_default();
            if !status.success() {
                metrics::REGION_FILTER_FAILURES.inc();
                return Err(StreamError::ProcessFailed {
                    status: status.to_string(),
                    stderr: stderr.trim().to_string(),
                });
            }
            return Ok(Box::pin(futures::stream::empty()));
        }

        let path = request.path.clone();
        let stream = async_stream::try_stream! {
            // Owning the child keeps kill_on_drop armed until the body is done.
            let mut child = child;
            if let Some(chunk) = first {
                yield chunk;
            }
            while let Some(chunk) = stdout.next().await {
                yield chunk?;
            }
            let status = child.wait().await?;
            if !status.success() {
                let stderr = stderr_task.await.unwrap_or_default();
                metrics::REGION_FILTER_FAILURES.inc();
                tracing::error!(
                    path = %path.display(),
                    status = %status,
                    stderr = %stderr.trim(),
                    "Region filter failed mid-stream"
                );
                Err::<(), _>(std::io::Error::other(format!("region filter exited with {status}")))?;
            }
        };
        Ok(Box::pin(stream))
    }
}

/// Translate samtools query parameters into `samtools view` arguments.
///
/// `head`, `headonly` and `count` are presence flags; `flag` and `mapq` take
/// integers; `lib` and `readgroup` take names. Other keys are ignored.
pub fn parse_samtools_args(params: &[(String, String)]) -> ApiResult<Vec<String>> {
    let mut args = Vec::new();
    for (key, value) in params {
        match key.as_str() {
            "head" => args.push("-h".to_string()),
            "headonly" => args.push("-H".to_string()),
            "count" => args.push("-c".to_string()),
            "flag" => {
                args.push("-f".to_string());
                args.push(parse_int(key, value)?);
            }
            "mapq" => {
                args.push("-q".to_string());
                args.push(parse_int(key, value)?);
            }
            "lib" => {
                args.push("-l".to_string());
                args.push(parse_name(key, value)?);
            }
            "readgroup" => {
                args.push("-r".to_string());
                args.push(parse_name(key, value)?);
            }
            _ => {}
        }
    }
    Ok(args)
}

/// Validate a `region` value. It is passed to samtools as a positional
/// argument, which getopt would still parse as an option if it began with `-`.
pub fn parse_region(value: &str) -> ApiResult<String> {
    parse_name("region", value)
}

fn parse_int(key: &str, value: &str) -> ApiResult<String> {
    value
        .trim()
        .parse::<u32>()
        .map(|v| v.to_string())
        .map_err(|_| ApiError::InvalidRequest(format!("Invalid {key} value: {value}")))
}

fn parse_name(key: &str, value: &str) -> ApiResult<String> {
    let value = value.trim();
    if value.is_empty() || value.starts_with('-') || value.chars().any(char::is_control) {
        return Err(ApiError::InvalidRequest(format!(
            "Invalid {key} value: {value}"
        )));
    }
    Ok(value.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn params(pairs: &[(&str, &str)]) -> Vec<(String, String)> {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }

    #[test]
    fn test_args_follow_query_order() {
        let args = parse_samtools_args(&params(&[
            ("download", ""),
            ("head", ""),
            ("flag", "4"),
            ("readgroup", "rg1"),
            ("mapq", "30"),
            ("count", "1"),
        ]))
        .unwrap();
        assert_eq!(args, ["-h", "-f", "4", "-r", "rg1", "-q", "30", "-c"]);
    }

    #[test]
    fn test_invalid_values_rejected() {
        assert!(matches!(
            parse_samtools_args(&params(&[("flag", "four")])),
            Err(ApiError::InvalidRequest(_))
        ));
        assert!(matches!(
            parse_samtools_args(&params(&[("mapq", "-1")])),
            Err(ApiError::InvalidRequest(_))
        ));
        assert!(matches!(
            parse_samtools_args(&params(&[("lib", "--output=/tmp/x")])),
            Err(ApiError::InvalidRequest(_))
        ));
    }

    #[test]
    fn test_region_must_not_look_like_an_option() {
        assert_eq!(parse_region(" chr1:100-200 ").unwrap(), "chr1:100-200");
        for bad in ["-o/tmp/out.sam", "--output=x", "", "chr1\n-o"] {
            assert!(
                matches!(parse_region(bad), Err(ApiError::InvalidRequest(_))),
                "{bad:?}"
            );
        }
    }

    #[tokio::test]
    async fn test_missing_binary_is_spawn_error() {
        let filter = SamtoolsFilter::new("/nonexistent/samtools");
        let err = match filter.run(RegionRequest::default()).await {
            Err(e) => e,
            Ok(_) => panic!("expected spawn failure"),
        };
        assert!(matches!(err, StreamError::Spawn(_)));
    }

    #[cfg(unix)]
    mod process {
        use super::*;
        use std::os::unix::fs::PermissionsExt;

        fn script(dir: &tempfile::TempDir, body: &str) -> PathBuf {
            let path = dir.path().join("samtools");
            std::fs::write(&path, format!("#!/bin/sh\n{body}\n")).unwrap();
            std::fs::set_permissions(&path, std::fs::Permissions::from_mode(0o755)).unwrap();
            path
        }

        async fn collect(mut stream: BodyStream) -> std::io::Result<Vec<u8>> {
            let mut out = Vec::new();
            while let Some(chunk) = stream.next().await {
                out.extend_from_slice(&chunk?);
            }
            Ok(out)
        }

        #[tokio::test]
        async fn test_stdout_streamed_verbatim() {
            let dir = tempfile::tempdir().unwrap();
            let filter = SamtoolsFilter::new(script(&dir, "echo \"$@\""));
            let request = RegionRequest {
                path: PathBuf::from("/data/reads.bam"),
                region: Some("chr1:100-200".to_string()),
                args: vec!["-c".to_string()],
            };
            let out = collect(filter.run(request).await.unwrap()).await.unwrap();
            assert_eq!(out, b"view -c /data/reads.bam chr1:100-200\n");
        }

        #[tokio::test]
        async fn test_immediate_failure_is_clean_error() {
            let dir = tempfile::tempdir().unwrap();
            let filter = SamtoolsFilter::new(script(&dir, "echo 'bad region' >&2; exit 3"));
            let err = match filter.run(RegionRequest::default()).await {
                Err(e) => e,
                Ok(_) => panic!("expected process failure"),
            };
            match err {
                StreamError::ProcessFailed { stderr, .. } => assert_eq!(stderr, "bad region"),
                other => panic!("unexpected error: {other}"),
            }
        }

        #[tokio::test]
        async fn test_stderr_cut_inside_multibyte_char() {
            let dir = tempfile::tempdir().unwrap();
            // 4095 ASCII bytes followed by a two-byte character straddling the limit.
            let filter = SamtoolsFilter::new(script(
                &dir,
                "printf '%4095s\\303\\251' '' | tr ' ' a >&2; exit 2",
            ));
            let err = match filter.run(RegionRequest::default()).await {
                Err(e) => e,
                Ok(_) => panic!("expected process failure"),
            };
            match err {
                StreamError::ProcessFailed { stderr, .. } => {
                    assert!(stderr.starts_with("aaaa"), "{stderr:?}");
                    assert!(stderr.len() >= MAX_STDERR_LEN - 1);
                }
                other => panic!("unexpected error: {other}"),
            }
        }

        #[cfg(target_os = "linux")]
        fn process_running(pid: &str) -> bool {
            // Gone, or a zombie awaiting reaping, both count as exited.
            match std::fs::read_to_string(format!("/proc/{pid}/stat")) {
                Ok(stat) => stat
                    .rsplit(')')
                    .next()
                    .is_some_and(|rest| !rest.trim_start().starts_with('Z')),
                Err(_) => false,
            }
        }

        #[cfg(target_os = "linux")]
        #[tokio::test]
        async fn test_dropped_body_kills_process() {
            let dir = tempfile::tempdir().unwrap();
            let pid_file = dir.path().join("pid");
            let filter = SamtoolsFilter::new(script(
                &dir,
                &format!("echo $$ > {}; echo first; exec sleep 30", pid_file.display()),
            ));

            let mut stream = filter.run(RegionRequest::default()).await.unwrap();
            let first = stream.next().await.unwrap().unwrap();
            assert_eq!(first.as_ref(), b"first\n");
            let pid = std::fs::read_to_string(&pid_file).unwrap().trim().to_string();
            assert!(process_running(&pid));

            drop(stream);

            let mut exited = false;
            for _ in 0..50 {
                if !process_running(&pid) {
                    exited = true;
                    break;
                }
                tokio::time::sleep(std::time::Duration::from_millis(100)).await;
            }
            assert!(exited, "process {pid} still running after body was dropped");
        }

        #[tokio::test]
        async fn test_late_failure_terminates_body() {
            let dir = tempfile::tempdir().unwrap();
            let filter = SamtoolsFilter::new(script(&dir, "echo partial; exit 1"));
            let stream = filter.run(RegionRequest::default()).await.unwrap();
            assert!(collect(stream).await.is_err());
        }
    }
}
