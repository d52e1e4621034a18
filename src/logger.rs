// Copyright (c) 2026 shaneyale (shaneyale86@gmail.com)
// All rights reserved.

use std::time::Instant;

use log::{debug, info};

use crate::{handler::Handler, request::Request, response::Response};

/// 记录请求方法、来源地址与 URL，然后交给被包装的处理器。
pub struct RequestLogger<H> {
    inner: H,
}

impl<H: Handler> RequestLogger<H> {
    pub fn new(inner: H) -> Self {
        Self { inner }
    }
}

impl<H: Handler> Handler for RequestLogger<H> {
    fn serve(&self, request: &Request) -> Response {
        let remote = match request.remote_addr() {
            Some(addr) => addr.to_string(),
            None => "-".to_string(),
        };
        info!(
            "[ID{}]{:?} Request from {:?} for {:?}",
            request.id(),
            request.method().to_string(),
            remote,
            request.target()
        );

        let start_time = Instant::now();
        let response = self.inner.serve(request);
        debug!(
            "[ID{}]{} {}，服务端用时{}ms",
            request.id(),
            response.status_code(),
            response.information(),
            start_time.elapsed().as_millis()
        );
        response
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::param::HttpRequestMethod;

    struct NotFound;

    impl Handler for NotFound {
        fn serve(&self, _request: &Request) -> Response {
            Response::from_status_code(404, &[], false)
        }
    }

    #[test]
    fn test_logger_returns_inner_response() {
        let logger = RequestLogger::new(NotFound);
        let request = Request::new(HttpRequestMethod::Get, "/x").with_remote_addr("127.0.0.1:5000".parse().unwrap());
        assert_eq!(logger.serve(&request).status_code(), 404);
    }
}
