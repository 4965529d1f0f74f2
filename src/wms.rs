use crate::error::{Result, ScanError};
use crate::geometry::BoundingBox;
use log::{debug, trace};
use std::time::Duration;

/// Edge length of the requested imagery, in pixels.
pub const DEFAULT_TILE_SIZE: u32 = 256;

pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(30);

const MAX_TILE_SIZE: u32 = 4096;

/// Anything that can return the raw imagery bytes for a bounding box.
pub trait TileSource: Sync {
    fn fetch_tile(&self, bbox: &BoundingBox, size: u32) -> Result<Vec<u8>>;
}

#[derive(Debug, Clone)]
pub struct WmsConfig {
    pub base_url: String,
    pub layer: String,
    pub style: String,
    pub timeout: Duration,
    pub user_agent: String,
}

impl WmsConfig {
    pub fn new(
        base_url: impl Into<String>,
        layer: impl Into<String>,
        style: impl Into<String>,
    ) -> Self {
        Self {
            base_url: base_url.into(),
            layer: layer.into(),
            style: style.into(),
            timeout: DEFAULT_TIMEOUT,
            user_agent: concat!("hazard-scan/", env!("CARGO_PKG_VERSION")).to_string(),
        }
    }
}

/// Validate requested tile size
pub fn validate_tile_size(size: u32) -> Result<()> {
    if size == 0 || size > MAX_TILE_SIZE {
        return Err(ScanError::InvalidTileSize(size));
    }
    Ok(())
}

/// Query parameters of a WMS 1.1.1 GetMap request for a square tile.
pub fn get_map_params(
    layer: &str,
    style: &str,
    bbox: &BoundingBox,
    size: u32,
) -> Vec<(&'static str, String)> {
    vec![
        ("TRANSPARENT", "TRUE".to_string()),
        ("FORMAT", "image/png".to_string()),
        ("LAYERS", layer.to_string()),
        ("STYLES", style.to_string()),
        ("SERVICE", "WMS".to_string()),
        ("VERSION", "1.1.1".to_string()),
        ("REQUEST", "GetMap".to_string()),
        ("SRS", "EPSG:4326".to_string()),
        ("BBOX", bbox.to_wms_param()),
        ("WIDTH", size.to_string()),
        ("HEIGHT", size.to_string()),
    ]
}

/// Blocking WMS client. One instance is shared by every worker.
pub struct WmsClient {
    config: WmsConfig,
    http: reqwest::blocking::Client,
}

impl WmsClient {
    pub fn new(config: WmsConfig) -> Result<Self> {
        let http = reqwest::blocking::Client::builder()
            .timeout(config.timeout)
            .user_agent(config.user_agent.clone())
            .build()?;
        debug!(
            "WMS client for {} (layer={}, style={}, timeout={:?})",
            config.base_url, config.layer, config.style, config.timeout
        );
        Ok(Self { config, http })
    }

    pub fn config(&self) -> &WmsConfig {
        &self.config
    }

    fn map_error(&self, err: reqwest::Error) -> ScanError {
        if err.is_timeout() {
            ScanError::FetchTimeout(self.config.timeout)
        } else if let Some(status) = err.status() {
            ScanError::FetchStatus(status.as_u16())
        } else {
            ScanError::FetchTransport(err.to_string())
        }
    }
}

impl TileSource for WmsClient {
    fn fetch_tile(&self, bbox: &BoundingBox, size: u32) -> Result<Vec<u8>> {
        let params = get_map_params(&self.config.layer, &self.config.style, bbox, size);
        trace!("GetMap BBOX={}", bbox.to_wms_param());

        let response = self
            .http
            .get(&self.config.base_url)
            .query(&params)
            .send()
            .map_err(|e| self.map_error(e))?;

        let status = response.status();
        if !status.is_success() {
            return Err(ScanError::FetchStatus(status.as_u16()));
        }

        let bytes = response.bytes().map_err(|e| self.map_error(e))?;
        Ok(bytes.to_vec())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::{BufRead, BufReader, Write};
    use std::net::TcpListener;
    use std::thread;

    fn bbox() -> BoundingBox {
        BoundingBox {
            min_lon: 20.0,
            min_lat: 52.0,
            max_lon: 20.5,
            max_lat: 52.5,
        }
    }

    #[test]
    fn test_get_map_params() {
        let params = get_map_params("azbest", "default", &bbox(), 256);
        assert_eq!(params.len(), 11);
        let get = |key: &str| {
            params
                .iter()
                .find(|(k, _)| *k == key)
                .map(|(_, v)| v.as_str())
                .unwrap()
        };
        assert_eq!(get("TRANSPARENT"), "TRUE");
        assert_eq!(get("FORMAT"), "image/png");
        assert_eq!(get("LAYERS"), "azbest");
        assert_eq!(get("STYLES"), "default");
        assert_eq!(get("SERVICE"), "WMS");
        assert_eq!(get("VERSION"), "1.1.1");
        assert_eq!(get("REQUEST"), "GetMap");
        assert_eq!(get("SRS"), "EPSG:4326");
        assert_eq!(get("BBOX"), "20,52,20.5,52.5");
        assert_eq!(get("WIDTH"), "256");
        assert_eq!(get("HEIGHT"), "256");
    }

    #[test]
    fn test_validate_tile_size() {
        assert!(validate_tile_size(256).is_ok());
        assert!(validate_tile_size(1).is_ok());
        assert!(validate_tile_size(0).is_err());
        assert!(validate_tile_size(8192).is_err());
    }

    #[test]
    fn test_client_builds() {
        let config = WmsConfig::new("http://localhost:9/wms", "layer", "style");
        let client = WmsClient::new(config).unwrap();
        assert_eq!(client.config().timeout, DEFAULT_TIMEOUT);
    }

    #[test]
    fn test_unreachable_host_is_transport_failure() {
        let mut config = WmsConfig::new("http://127.0.0.1:9/wms", "layer", "style");
        config.timeout = Duration::from_secs(2);
        let client = WmsClient::new(config).unwrap();
        let err = client.fetch_tile(&bbox(), 256).unwrap_err();
        assert!(err.is_transient(), "{:?}", err);
    }

    /// Serve one connection on a local port: read the request head, wait
    /// `delay`, then write `head` and `body`. Returns the base URL and the
    /// request line the server saw.
    fn serve_once(
        head: &'static str,
        body: Vec<u8>,
        delay: Duration,
    ) -> (String, thread::JoinHandle<String>) {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let url = format!("http://{}/wms", listener.local_addr().unwrap());
        let handle = thread::spawn(move || {
            let (stream, _) = listener.accept().unwrap();
            let mut reader = BufReader::new(stream);
            let mut request_line = String::new();
            reader.read_line(&mut request_line).unwrap();
            let mut line = String::new();
            while reader.read_line(&mut line).unwrap() > 2 {
                line.clear();
            }
            thread::sleep(delay);
            let mut stream = reader.into_inner();
            let response = format!(
                "{}\r\nContent-Length: {}\r\nConnection: close\r\n\r\n",
                head,
                body.len()
            );
            // The client may have hung up already
            let _ = stream.write_all(response.as_bytes());
            let _ = stream.write_all(&body);
            request_line
        });
        (url, handle)
    }

    fn client(url: &str, timeout: Duration) -> WmsClient {
        let mut config = WmsConfig::new(url, "azbest", "");
        config.timeout = timeout;
        WmsClient::new(config).unwrap()
    }

    #[test]
    fn test_success_returns_body_bytes() {
        let png = b"\x89PNG\r\n\x1a\nnot really".to_vec();
        let (url, server) = serve_once(
            "HTTP/1.1 200 OK\r\nContent-Type: image/png",
            png.clone(),
            Duration::ZERO,
        );
        let bytes = client(&url, Duration::from_secs(5))
            .fetch_tile(&bbox(), 256)
            .unwrap();
        assert_eq!(bytes, png);

        let request_line = server.join().unwrap();
        assert!(request_line.starts_with("GET /wms?"));
        assert!(request_line.contains("REQUEST=GetMap"));
        assert!(request_line.contains("LAYERS=azbest"));
        assert!(request_line.contains("WIDTH=256"));
    }

    #[test]
    fn test_not_found_is_permanent_status() {
        let (url, server) = serve_once("HTTP/1.1 404 Not Found", Vec::new(), Duration::ZERO);
        let err = client(&url, Duration::from_secs(5))
            .fetch_tile(&bbox(), 256)
            .unwrap_err();
        assert!(matches!(err, ScanError::FetchStatus(404)), "{:?}", err);
        assert!(!err.is_transient());
        server.join().unwrap();
    }

    #[test]
    fn test_unavailable_is_transient_status() {
        let (url, server) = serve_once(
            "HTTP/1.1 503 Service Unavailable",
            b"busy".to_vec(),
            Duration::ZERO,
        );
        let err = client(&url, Duration::from_secs(5))
            .fetch_tile(&bbox(), 256)
            .unwrap_err();
        assert!(matches!(err, ScanError::FetchStatus(503)), "{:?}", err);
        assert!(err.is_transient());
        server.join().unwrap();
    }

    #[test]
    fn test_stalled_server_times_out() {
        let timeout = Duration::from_millis(300);
        let (url, _server) = serve_once("HTTP/1.1 200 OK", Vec::new(), Duration::from_secs(2));
        let err = client(&url, timeout).fetch_tile(&bbox(), 256).unwrap_err();
        match err {
            ScanError::FetchTimeout(limit) => assert_eq!(limit, timeout),
            other => panic!("expected timeout, got {:?}", other),
        }
        assert!(ScanError::FetchTimeout(timeout).is_transient());
    }
}
