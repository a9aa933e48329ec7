use crate::registry::Registry;
use anyhow::{Context, Result};
use hyper::http::StatusCode;
use hyper::service::{make_service_fn, service_fn};
use hyper::{Body, Method, Request, Response, Server};
use log::{debug, error, info, warn};
use std::convert::Infallible;
use std::net::SocketAddr;
use std::sync::Arc;

/// 全部指标的路径
pub const VARS_PATH: &str = "/debug/vars";

/// 指标注册表类型别名
pub type RegistryRef = Arc<Registry>;

/// 指标服务器
pub struct StatusServer {
    registry: RegistryRef,
}

impl StatusServer {
    /// 创建新的指标服务器实例
    #[inline]
    pub fn new(registry: RegistryRef) -> Self {
        Self { registry }
    }

    /// 运行服务器
    pub async fn run(self, addr: SocketAddr) -> Result<()> {
        let registry = self.registry;

        let make_svc = make_service_fn(move |_conn| {
            let registry = registry.clone();
            async move {
                Ok::<_, Infallible>(service_fn(move |req| {
                    let registry = registry.clone();
                    Self::handle_request(req, registry)
                }))
            }
        });

        let server = Server::try_bind(&addr)
            .with_context(|| format!("无法绑定地址 {addr}"))?
            .http1_keepalive(true)
            .http1_half_close(false)
            .tcp_keepalive(Some(std::time::Duration::from_secs(10)))
            .tcp_nodelay(true)
            .serve(make_svc);

        info!("服务器运行在: http://{addr}{VARS_PATH}");

        server.await.map_err(|e| {
            error!("服务器错误: {e}");
            anyhow::anyhow!("服务器运行错误: {e}")
        })?;

        info!("服务器正常关闭");
        Ok(())
    }

    /// 处理 HTTP 请求
    async fn handle_request(
        req: Request<Body>,
        registry: RegistryRef,
    ) -> std::result::Result<Response<Body>, Infallible> {
        if req.method() != Method::GET {
            return Ok(Self::serve_404());
        }

        let path = req.uri().path();
        let response = match path {
            "/health" => Self::serve_health(),
            VARS_PATH => Self::serve_json(registry.render_all()),
            _ => match path.strip_prefix(VARS_PATH).and_then(|rest| rest.strip_prefix('/')) {
                Some(key) => match registry.render(key) {
                    Some(text) => Self::serve_json(text),
                    None => {
                        debug!("请求了未注册的指标键: {key}");
                        Self::serve_404()
                    }
                },
                None => Self::serve_404(),
            },
        };
        Ok(response)
    }

    /// 指标数据每次请求都重新采样，不允许客户端缓存
    fn serve_json(body: String) -> Response<Body> {
        Self::response(
            StatusCode::OK,
            "application/json; charset=utf-8",
            Body::from(body),
        )
    }

    /// 提供健康检查端点
    #[inline]
    fn serve_health() -> Response<Body> {
        Self::response(StatusCode::OK, "text/plain", Body::from("OK"))
    }

    /// 提供 404 页面
    #[inline]
    fn serve_404() -> Response<Body> {
        warn!("请求了不存在的页面");
        Self::response(
            StatusCode::NOT_FOUND,
            "text/plain; charset=utf-8",
            Body::from("页面未找到"),
        )
    }

    fn response(status: StatusCode, content_type: &'static str, body: Body) -> Response<Body> {
        let mut response = Response::new(body);
        *response.status_mut() = status;
        let headers = response.headers_mut();
        headers.insert(
            hyper::header::CONTENT_TYPE,
            hyper::header::HeaderValue::from_static(content_type),
        );
        headers.insert(
            hyper::header::CACHE_CONTROL,
            hyper::header::HeaderValue::from_static("no-cache"),
        );
        response
    }
}

/// 配置结构
#[derive(Debug, Clone)]
pub struct Config {
    /// 服务端绑定地址
    pub bind_address: String,
    /// 服务端端口
    pub port: u16,
}

impl Default for Config {
    #[inline]
    fn default() -> Self {
        Self {
            bind_address: "0.0.0.0".to_string(),
            port: 8080,
        }
    }
}

impl Config {
    /// 构建服务器地址，IPv6 地址自动加上方括号
    pub fn address(&self) -> Result<SocketAddr> {
        let host = if self.bind_address.contains(':') && !self.bind_address.starts_with('[') {
            format!("[{}]", self.bind_address)
        } else {
            self.bind_address.clone()
        };
        format!("{host}:{}", self.port)
            .parse()
            .with_context(|| format!("无效的地址格式: {}", self.bind_address))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::registry::{MetricsConfig, RUNTIME_KEY};
    use hyper::{Body, Request, StatusCode};
    use std::io::Write;

    fn test_registry() -> (tempfile::NamedTempFile, RegistryRef) {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "99 (srv) S 1 99 99 0 -1 0 0 0 0 0 300 100 0 0 20 0 3 0 10 1000 2").unwrap();
        let config = MetricsConfig {
            stat_path: file.path().to_path_buf(),
            platform: crate::platform::Platform::default(),
        };
        let registry = Registry::with_defaults(&config).unwrap();
        (file, Arc::new(registry))
    }

    async fn get(path: &str, registry: RegistryRef) -> Response<Body> {
        let request = Request::builder()
            .method("GET")
            .uri(path)
            .body(Body::empty())
            .unwrap();
        StatusServer::handle_request(request, registry).await.unwrap()
    }

    async fn body_string(response: Response<Body>) -> String {
        let body = hyper::body::to_bytes(response.into_body()).await.unwrap();
        String::from_utf8(body.to_vec()).unwrap()
    }

    #[test]
    fn test_config_default() {
        let config = Config::default();
        assert_eq!(config.bind_address, "0.0.0.0");
        assert_eq!(config.port, 8080);
    }

    #[test]
    fn test_config_address() {
        let config = Config::default();
        let addr = config.address().unwrap();
        assert_eq!(addr.to_string(), "0.0.0.0:8080");
    }

    #[test]
    fn test_config_address_ipv6() {
        let config = Config {
            bind_address: "::".to_string(),
            port: 9000,
        };
        assert_eq!(config.address().unwrap().to_string(), "[::]:9000");
    }

    #[test]
    fn test_config_address_invalid() {
        let config = Config {
            bind_address: "not an address".to_string(),
            port: 1,
        };
        assert!(config.address().is_err());
    }

    #[tokio::test]
    async fn test_serve_health() {
        let response = StatusServer::serve_health();
        assert_eq!(response.status(), StatusCode::OK);

        let headers = response.headers();
        assert_eq!(headers.get("content-type").unwrap(), "text/plain");
        assert_eq!(headers.get("cache-control").unwrap(), "no-cache");

        assert_eq!(body_string(response).await, "OK");
    }

    #[tokio::test]
    async fn test_serve_404() {
        let response = StatusServer::serve_404();
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
        assert_eq!(
            response.headers().get("content-type").unwrap(),
            "text/plain; charset=utf-8"
        );
        assert_eq!(body_string(response).await, "页面未找到");
    }

    #[tokio::test]
    async fn test_handle_request_all_vars() {
        let (_file, registry) = test_registry();
        let response = get(VARS_PATH, registry).await;
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(
            response.headers().get("content-type").unwrap(),
            "application/json; charset=utf-8"
        );

        let value: serde_json::Value = serde_json::from_str(&body_string(response).await).unwrap();
        assert_eq!(value["proc.cpu.seconds"]["total"].as_f64(), Some(4.0));
        assert_eq!(value["proc.stat"]["rssBytes"].as_u64(), Some(8192));
        assert!(value["runtime"].is_object());
        assert!(value["runtime.metrics"].is_object());
    }

    #[tokio::test]
    async fn test_handle_request_single_key() {
        let (_file, registry) = test_registry();
        let expected = registry.render("proc.stat").unwrap();

        let response = get("/debug/vars/proc.stat", registry.clone()).await;
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(body_string(response).await, expected);

        let response = get(&format!("{VARS_PATH}/{RUNTIME_KEY}"), registry).await;
        let value: serde_json::Value = serde_json::from_str(&body_string(response).await).unwrap();
        assert!(value["NumCPU"].as_u64().unwrap() >= 1);
    }

    #[tokio::test]
    async fn test_handle_request_unknown_key() {
        let (_file, registry) = test_registry();
        let response = get("/debug/vars/nope", registry).await;
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn test_handle_request_health() {
        let (_file, registry) = test_registry();
        let response = get("/health", registry).await;
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(body_string(response).await, "OK");
    }

    #[tokio::test]
    async fn test_handle_request_404() {
        let (_file, registry) = test_registry();
        for path in ["/", "/notfound", "/debug/varsx", "/debug/vars/"] {
            let response = get(path, registry.clone()).await;
            assert_eq!(response.status(), StatusCode::NOT_FOUND, "路径 {path}");
        }
    }

    #[tokio::test]
    async fn test_handle_request_post_method() {
        let (_file, registry) = test_registry();
        let request = Request::builder()
            .method("POST")
            .uri(VARS_PATH)
            .body(Body::empty())
            .unwrap();

        let response = StatusServer::handle_request(request, registry).await.unwrap();
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn test_run_rejects_bad_bind() {
        let (_file, registry) = test_registry();
        // 端口被占用时返回错误而不是 panic
        let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        let addr = listener.local_addr().unwrap();
        let result = StatusServer::new(registry).run(addr).await;
        assert!(result.is_err());
    }
}
