//! rawhttp - directory server
//!
//! Serves a directory over HTTP(S): a listing page at `/`, downloads (with
//! range support, directories as tar archives) under `/files/`, and
//! multipart uploads at `/upload`.

use rawhttp::connection::recovery::escape_html;
use rawhttp::{
    App, Handler, HandlerFuture, MultipartError, Request, Response, ServerConfig, TlsConfig,
};
use std::path::{Component, Path, PathBuf};
use std::time::Duration;
use tokio::signal;
use tracing::{error, info};
use tracing_subscriber::{EnvFilter, FmtSubscriber};

/// Command-line configuration
struct Config {
    server: ServerConfig,
    /// Directory served under /files/
    root: PathBuf,
    /// Directory uploads are written to
    upload_dir: PathBuf,
    /// Largest accepted upload in bytes
    max_upload: Option<u64>,
    tls_cert: Option<PathBuf>,
    tls_key: Option<PathBuf>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            server: ServerConfig::default(),
            root: PathBuf::from("."),
            upload_dir: PathBuf::from("."),
            max_upload: None,
            tls_cert: None,
            tls_key: None,
        }
    }
}

fn fail(message: &str) -> ! {
    eprintln!("Error: {message}");
    std::process::exit(1);
}

/// Returns the value following the flag at `i`, or exits.
fn value_of<'a>(args: &'a [String], i: usize, flag: &str) -> &'a str {
    match args.get(i + 1) {
        Some(value) => value.as_str(),
        None => fail(&format!("{flag} requires a value")),
    }
}

fn parse_number<T: std::str::FromStr>(raw: &str, what: &str) -> T {
    raw.parse()
        .unwrap_or_else(|_| fail(&format!("invalid {what}: {raw}")))
}

impl Config {
    /// Parse configuration from command-line arguments
    fn from_args() -> Self {
        let mut config = Config::default();
        let args: Vec<String> = std::env::args().collect();

        let mut i = 1;
        while i < args.len() {
            let flag = args[i].as_str();
            match flag {
                "--host" | "-h" => config.server.host = value_of(&args, i, flag).to_string(),
                "--port" | "-p" => config.server.port = parse_number(value_of(&args, i, flag), "port number"),
                "--root" | "-r" => config.root = PathBuf::from(value_of(&args, i, flag)),
                "--upload-dir" => config.upload_dir = PathBuf::from(value_of(&args, i, flag)),
                "--max-upload" => config.max_upload = Some(parse_number(value_of(&args, i, flag), "upload size")),
                "--timeout" => {
                    let secs: u64 = parse_number(value_of(&args, i, flag), "timeout");
                    config.server.timeout = Duration::from_secs(secs);
                }
                "--accept-tasks" => {
                    config.server.accept_tasks = parse_number(value_of(&args, i, flag), "accept task count")
                }
                "--tls-cert" => config.tls_cert = Some(PathBuf::from(value_of(&args, i, flag))),
                "--tls-key" => config.tls_key = Some(PathBuf::from(value_of(&args, i, flag))),
                "--debug" | "-d" => {
                    config.server.debug = true;
                    i += 1;
                    continue;
                }
                "--no-keep-alive" => {
                    config.server.keep_alive = false;
                    i += 1;
                    continue;
                }
                "--quiet" | "-q" => {
                    config.server.console_log = false;
                    i += 1;
                    continue;
                }
                "--help" => {
                    print_help();
                    std::process::exit(0);
                }
                "--version" | "-v" => {
                    println!("rawhttp version {}", rawhttp::VERSION);
                    std::process::exit(0);
                }
                _ => {
                    eprintln!("Unknown argument: {}", args[i]);
                    print_help();
                    std::process::exit(1);
                }
            }
            i += 2;
        }

        config.server.tls = match (config.tls_cert.take(), config.tls_key.take()) {
            (Some(cert), Some(key)) => Some(TlsConfig::new(cert, key)),
            (None, None) => None,
            _ => fail("--tls-cert and --tls-key must be given together"),
        };
        config
    }
}

fn print_help() {
    println!(
        r#"
rawhttp - HTTP/1.1 directory server

USAGE:
    rawhttp [OPTIONS]

OPTIONS:
    -h, --host <HOST>          Host to bind to (default: 127.0.0.1)
    -p, --port <PORT>          Port to listen on (default: 8080)
    -r, --root <DIR>           Directory served under /files/ (default: .)
        --upload-dir <DIR>     Directory uploads are stored in (default: .)
        --max-upload <BYTES>   Reject uploads larger than this
        --timeout <SECS>       Keep-alive read timeout (default: 60)
        --accept-tasks <N>     Concurrent accept loops (default: 4)
        --tls-cert <PEM>       Certificate chain for HTTPS
        --tls-key <PEM>        Private key for HTTPS
    -d, --debug                Show error details on 500 pages
        --no-keep-alive        Close every connection after one response
    -q, --quiet                Do not log each request
    -v, --version              Print version information
        --help                 Print this help message

EXAMPLES:
    rawhttp --root ./public                # Serve ./public on 127.0.0.1:8080
    rawhttp --host 0.0.0.0 --port 9000     # Listen on all interfaces
    curl -r 0-99 http://127.0.0.1:8080/files/video.mp4
    curl -F file=@notes.txt http://127.0.0.1:8080/upload
"#
    );
}

/// Maps a URL suffix onto `root`, refusing anything that climbs out of it.
fn resolve_under(root: &Path, suffix: &str) -> Option<PathBuf> {
    let decoded = urlencoding::decode(suffix).ok()?;
    let mut path = root.to_path_buf();
    for component in Path::new(decoded.as_ref()).components() {
        match component {
            Component::Normal(part) => path.push(part),
            Component::CurDir => {}
            Component::RootDir => {}
            Component::ParentDir | Component::Prefix(_) => return None,
        }
    }
    Some(path)
}

/// Listing of the served directory plus an upload form.
struct IndexRoute {
    root: PathBuf,
}

impl Handler for IndexRoute {
    fn call<'a>(&'a self, req: &'a mut Request) -> HandlerFuture<'a> {
        Box::pin(async move {
            if req.path() != "/" {
                return Ok(Response::not_found());
            }
            let mut names = Vec::new();
            let mut entries = tokio::fs::read_dir(&self.root).await?;
            while let Some(entry) = entries.next_entry().await? {
                let name = entry.file_name().to_string_lossy().into_owned();
                let suffix = if entry.file_type().await?.is_dir() { "/" } else { "" };
                names.push(format!("{name}{suffix}"));
            }
            names.sort();

            let mut page = String::from("<!DOCTYPE html><html><head><title>rawhttp</title></head><body><h1>Files</h1><ul>");
            for name in &names {
                page.push_str(&format!(
                    "<li><a href=\"/files/{}\">{}</a></li>",
                    urlencoding::encode(name.trim_end_matches('/')),
                    escape_html(name)
                ));
            }
            page.push_str(
                "</ul><form method=\"post\" action=\"/upload\" enctype=\"multipart/form-data\">\
                 <input type=\"file\" name=\"file\"><button>Upload</button></form></body></html>",
            );
            Ok(Response::ok().with_body(page))
        })
    }
}

/// Downloads under /files/: files honor Range, directories come as tar.
struct FileRoute {
    root: PathBuf,
}

impl Handler for FileRoute {
    fn call<'a>(&'a self, req: &'a mut Request) -> HandlerFuture<'a> {
        Box::pin(async move {
            let suffix = req.path().strip_prefix("/files").unwrap_or_default();
            let Some(path) = resolve_under(&self.root, suffix) else {
                return Ok(Response::new(403).with_body("<h1>403 Forbidden</h1>"));
            };
            let name = path
                .file_name()
                .map(|n| n.to_string_lossy().into_owned())
                .unwrap_or_else(|| "files".to_string());
            Ok(Response::attachment(path, &name))
        })
    }
}

/// Multipart uploads into the upload directory.
struct UploadRoute {
    dir: PathBuf,
    max_size: Option<u64>,
}

impl Handler for UploadRoute {
    fn call<'a>(&'a self, req: &'a mut Request) -> HandlerFuture<'a> {
        Box::pin(async move {
            match req.receive_file(&self.dir, None, self.max_size).await {
                Ok(path) => {
                    let name = path
                        .file_name()
                        .map(|n| n.to_string_lossy().into_owned())
                        .unwrap_or_default();
                    info!(file = %path.display(), "Upload stored");
                    Ok(Response::new(201).with_body(format!(
                        "<p>Stored {}</p><p><a href=\"/\">Back</a></p>",
                        escape_html(&name)
                    )))
                }
                Err(MultipartError::FileOverSize { limit }) => Ok(Response::new(413)
                    .with_body(format!("<p>Uploads are limited to {limit} bytes</p>"))),
                Err(MultipartError::Io(e)) => Err(e.into()),
                Err(e) => Ok(Response::new(400).with_body(format!("<p>{}</p>", escape_html(&e.to_string())))),
            }
        })
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Parse command-line arguments
    let config = Config::from_args();

    // Set up logging
    let default_level = if config.server.debug { "debug" } else { "info" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));
    FmtSubscriber::builder()
        .with_env_filter(filter)
        .with_target(false)
        .with_thread_ids(false)
        .with_file(false)
        .with_line_number(false)
        .init();

    let mut app = App::new();
    app.register("/", IndexRoute { root: config.root.clone() })
        .register("/files/", FileRoute { root: config.root.clone() })
        .register(
            "/upload",
            UploadRoute {
                dir: config.upload_dir.clone(),
                max_size: config.max_upload,
            },
        );

    let server = app.bind(config.server.clone()).await?;
    info!(
        "rawhttp v{} serving {} on {}://{}",
        rawhttp::VERSION,
        config.root.display(),
        config.server.scheme(),
        server.local_addr()
    );

    // Set up graceful shutdown
    let shutdown = async {
        if let Err(e) = signal::ctrl_c().await {
            error!(error = %e, "Failed to install Ctrl+C handler");
            std::future::pending::<()>().await;
        }
        info!("Shutdown signal received, stopping server...");
    };

    tokio::select! {
        _ = server.run() => {}
        _ = shutdown => {}
    }

    info!("Server shutdown complete");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_resolve_under_stays_inside_root() {
        let root = Path::new("/srv/data");
        assert_eq!(resolve_under(root, "/a/b.txt"), Some(PathBuf::from("/srv/data/a/b.txt")));
        assert_eq!(resolve_under(root, "/my%20file.txt"), Some(PathBuf::from("/srv/data/my file.txt")));
        assert_eq!(resolve_under(root, ""), Some(PathBuf::from("/srv/data")));
        assert_eq!(resolve_under(root, "/./x"), Some(PathBuf::from("/srv/data/x")));
        assert_eq!(resolve_under(root, "/../etc/passwd"), None);
        assert_eq!(resolve_under(root, "/a/%2E%2E/%2E%2E/etc"), None);
    }
}
