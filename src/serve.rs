//! Development server with live reload support.
//!
//! A lightweight HTTP server over the build output, built on `tiny_http`:
//!
//! - Static file serving from `dist/`
//! - Automatic `index.html` resolution for directories
//! - Live reload script injected into every HTML response
//! - File watching and incremental rebuild (via `watch` module)
//! - Graceful shutdown on Ctrl+C
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────┐  ┌──────────────────┐  ┌──────────────────┐
//! │   Main Thread   │  │  Watcher Thread  │  │  Reload Thread   │
//! │  (HTTP Server)  │  │  (File Monitor)  │  │  (WS Acceptor)   │
//! └────────┬────────┘  └────────┬─────────┘  └────────┬─────────┘
//!          │                    │                     │
//!          ▼                    ▼                     ▼
//!    Serve dist/          Rebuild on change     Push reload after
//!                                               each finalize step
//! ```

use crate::{config::PipelineConfig, log, pipeline::Toolchain, reload, watch};
use anyhow::{Context, Result, anyhow};
use std::{
    borrow::Cow,
    fmt::Display,
    fs,
    io::Cursor,
    net::{IpAddr, SocketAddr},
    path::{Component, Path},
    process::Command,
    sync::Arc,
    thread,
};
use tiny_http::{Header, Request, Response, Server, StatusCode};

// ============================================================================
// Constants
// ============================================================================

/// Live reload client, with `{port}` standing for the WebSocket port
const LIVERELOAD_SCRIPT: &str = include_str!("embed/serve/livereload.js");

/// Ports probed upward from the preferred one before giving up
const MAX_PORT_RETRIES: u16 = 100;

// ============================================================================
// Server Entry Point
// ============================================================================

/// Serve the build output, rebuild on change and push live reloads.
///
/// Blocks until Ctrl+C is received.
pub fn serve_site(config: &'static PipelineConfig, tools: &'static Toolchain) -> Result<()> {
    let interface: IpAddr = config
        .serve
        .interface
        .parse()
        .with_context(|| format!("[serve.interface] `{}` is not an IP address", config.serve.interface))?;

    let (server, port) = bind_first_free(config.serve.port, |port| {
        Server::http(SocketAddr::new(interface, port))
    })?;
    let server = Arc::new(server);
    let addr = SocketAddr::new(interface, port);

    let reload_port = reload::start(interface, config.serve.reload_port)?;

    // Set up Ctrl+C handler for graceful shutdown
    let server_for_signal = Arc::clone(&server);
    ctrlc::set_handler(move || {
        log!("serve"; "shutting down...");
        server_for_signal.unblock();
    })
    .context("Failed to set Ctrl+C handler")?;

    let url = root_page_url(config, addr);
    log!("serve"; "{url}");

    thread::spawn(move || {
        if let Err(err) = watch::watch_for_changes_blocking(config, tools) {
            log!("watch"; "{err:#}");
        }
    });

    if config.serve.open
        && let Err(err) = open_browser(&url)
    {
        log!("serve"; "could not open a browser: {err}");
    }

    // Handle requests in main thread (blocks until Ctrl+C)
    for request in server.incoming_requests() {
        if let Err(e) = handle_request(request, &config.build.output, reload_port) {
            log!("serve"; "request error: {e}");
        }
    }

    Ok(())
}

/// Bind with `bind`, moving to the next port while the current one fails.
///
/// Returns the bound value and its port.
pub fn bind_first_free<T, E, F>(base_port: u16, mut bind: F) -> Result<(T, u16)>
where
    E: Display,
    F: FnMut(u16) -> Result<T, E>,
{
    let mut last_error = None;
    for offset in 0..MAX_PORT_RETRIES {
        let Some(port) = base_port.checked_add(offset) else {
            break;
        };
        match bind(port) {
            Ok(bound) => {
                if offset > 0 {
                    log!("serve"; "port {base_port} in use, using {port} instead");
                }
                return Ok((bound, port));
            }
            Err(e) => last_error = Some(e.to_string()),
        }
    }

    Err(anyhow!(
        "Failed to bind any port from {base_port} ({} attempts): {}",
        MAX_PORT_RETRIES,
        last_error.unwrap_or_else(|| "port range exhausted".into())
    ))
}

/// Address of the first configured page.
fn root_page_url(config: &PipelineConfig, addr: SocketAddr) -> String {
    let first_page = config.build.pages.first().map_or("", String::as_str);
    format!("http://{addr}{}{first_page}", config.app.url_folder())
}

/// Open a URL in the default browser.
fn open_browser(url: &str) -> std::io::Result<()> {
    #[cfg(target_os = "windows")]
    Command::new("cmd").args(["/c", "start", url]).spawn()?;

    #[cfg(target_os = "macos")]
    Command::new("open").arg(url).spawn()?;

    #[cfg(not(any(target_os = "windows", target_os = "macos")))]
    Command::new("xdg-open").arg(url).spawn()?;

    Ok(())
}

// ============================================================================
// Request Handling
// ============================================================================

/// Handle a single HTTP request.
///
/// Request resolution order:
/// 1. Exact file match → serve file
/// 2. Directory with index.html → serve index.html
/// 3. Nothing found → 404
fn handle_request(request: Request, serve_root: &Path, reload_port: u16) -> Result<()> {
    // Decode URL-encoded characters (e.g., %20 → space)
    let url_path = urlencoding::decode(request.url())
        .map(Cow::into_owned)
        .unwrap_or_default();

    // Strip query string (e.g., ?livereload=123) before resolving path
    let path_without_query = url_path.split(['?', '#']).next().unwrap_or(&url_path);
    let request_path = Path::new(path_without_query.trim_matches('/'));
    if request_path
        .components()
        .any(|c| !matches!(c, Component::Normal(_)))
    {
        return serve_not_found(request);
    }
    let local_path = serve_root.join(request_path);

    if local_path.is_file() {
        return serve_file(request, &local_path, reload_port);
    }

    let index_path = local_path.join("index.html");
    if local_path.is_dir() && index_path.is_file() {
        return serve_file(request, &index_path, reload_port);
    }

    serve_not_found(request)
}

// ============================================================================
// Response Helpers
// ============================================================================

fn content_type(value: &str) -> Result<Header> {
    Header::from_bytes("Content-Type", value).map_err(|()| anyhow!("invalid header `{value}`"))
}

/// Serve a file with appropriate content type, injecting live reload into HTML.
fn serve_file(request: Request, path: &Path, reload_port: u16) -> Result<()> {
    let content = fs::read(path).with_context(|| format!("Failed to read {}", path.display()))?;
    let mime = guess_content_type(path);

    let content = if mime.starts_with("text/html") {
        inject_live_reload(&String::from_utf8_lossy(&content), reload_port).into_bytes()
    } else {
        content
    };

    let response = Response::from_data(content).with_header(content_type(mime)?);
    request.respond(response)?;
    Ok(())
}

/// Serve 404 Not Found response.
fn serve_not_found(request: Request) -> Result<()> {
    let response = Response::new(
        StatusCode(404),
        vec![content_type("text/plain")?],
        Cursor::new("404 Not Found"),
        Some(13),
        None,
    );
    request.respond(response)?;
    Ok(())
}

/// Insert the live reload client before `</body>`, or append it.
fn inject_live_reload(html: &str, reload_port: u16) -> String {
    let script = format!(
        "<script>{}</script>",
        LIVERELOAD_SCRIPT.replace("{port}", &reload_port.to_string())
    );
    match html.rfind("</body>") {
        Some(index) => format!("{}{script}{}", &html[..index], &html[index..]),
        None => format!("{html}{script}"),
    }
}

// ============================================================================
// Content Type Detection
// ============================================================================

/// Guess MIME content type from file extension.
///
/// Returns `application/octet-stream` for unknown extensions.
fn guess_content_type(path: &Path) -> &'static str {
    match path.extension().and_then(|e| e.to_str()) {
        // Web content
        Some("html" | "htm") => "text/html; charset=utf-8",
        Some("css") => "text/css; charset=utf-8",
        Some("js" | "mjs") => "application/javascript; charset=utf-8",
        Some("map" | "json") => "application/json; charset=utf-8",

        // Images
        Some("svg") => "image/svg+xml",
        Some("png") => "image/png",
        Some("jpg" | "jpeg") => "image/jpeg",
        Some("gif") => "image/gif",
        Some("webp") => "image/webp",
        Some("ico") => "image/x-icon",

        // Fonts
        Some("woff") => "font/woff",
        Some("woff2") => "font/woff2",
        Some("ttf") => "font/ttf",

        Some("txt") => "text/plain; charset=utf-8",

        // Default binary
        _ => "application/octet-stream",
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::{
        io::{Read, Write},
        net::{Ipv4Addr, TcpListener, TcpStream},
    };

    #[test]
    fn test_bind_first_free_skips_taken_port() {
        let taken = TcpListener::bind((Ipv4Addr::LOCALHOST, 0)).unwrap();
        let base = taken.local_addr().unwrap().port();

        let (listener, port) =
            bind_first_free(base, |p| TcpListener::bind((Ipv4Addr::LOCALHOST, p))).unwrap();
        assert!(port > base);
        assert_eq!(listener.local_addr().unwrap().port(), port);
    }

    #[test]
    fn test_bind_first_free_gives_up() {
        let err = bind_first_free(9000, |_| Err::<(), _>("in use")).unwrap_err();
        assert!(err.to_string().contains("in use"));
    }

    #[test]
    fn test_inject_live_reload() {
        let html = inject_live_reload("<html><body><p>x</p></body></html>", 35730);
        assert!(html.contains(":35730'"));
        assert!(html.ends_with("</script></body></html>"));
        assert!(!html.contains("{port}"));

        let fragment = inject_live_reload("<p>x</p>", 1);
        assert!(fragment.starts_with("<p>x</p><script>"));
    }

    #[test]
    fn test_root_page_url() {
        let config = PipelineConfig::default();
        let addr = SocketAddr::new(IpAddr::V4(Ipv4Addr::LOCALHOST), 9001);
        assert_eq!(
            root_page_url(&config, addr),
            "http://127.0.0.1:9001/webapp/web-project-boilerplate/index.html"
        );
    }

    #[test]
    fn test_content_types() {
        assert_eq!(guess_content_type(Path::new("a.css")), "text/css; charset=utf-8");
        assert_eq!(guess_content_type(Path::new("logo.svg")), "image/svg+xml");
        assert_eq!(
            guess_content_type(Path::new("blob")),
            "application/octet-stream"
        );
    }

    fn get(port: u16, path: &str) -> String {
        let mut stream = TcpStream::connect((Ipv4Addr::LOCALHOST, port)).unwrap();
        write!(stream, "GET {path} HTTP/1.1\r\nHost: localhost\r\nConnection: close\r\n\r\n")
            .unwrap();
        let mut response = String::new();
        stream.read_to_string(&mut response).unwrap();
        response
    }

    #[test]
    fn test_requests_are_resolved_against_output() {
        let dir = tempfile::tempdir().unwrap();
        let root = dir.path().to_path_buf();
        fs::create_dir_all(root.join("app")).unwrap();
        fs::write(root.join("app/index.html"), "<body>hi</body>").unwrap();
        fs::write(root.join("app/a.css"), ".a{}").unwrap();

        let (server, port) = bind_first_free(47100, |p| {
            Server::http(SocketAddr::new(IpAddr::V4(Ipv4Addr::LOCALHOST), p))
        })
        .unwrap();
        let serve_root = root.clone();
        let handle = thread::spawn(move || {
            for _ in 0..4 {
                let request = server.recv().unwrap();
                handle_request(request, &serve_root, 35729).unwrap();
            }
        });

        let page = get(port, "/app/");
        assert!(page.starts_with("HTTP/1.1 200"));
        assert!(page.contains("hi<script>"));

        let css = get(port, "/app/a.css?livereload=1");
        assert!(css.contains("text/css"));
        assert!(css.ends_with(".a{}"));

        assert!(get(port, "/app/missing.js").starts_with("HTTP/1.1 404"));
        assert!(get(port, "/app/../../etc/passwd").starts_with("HTTP/1.1 404"));
        handle.join().unwrap();
    }
}
