//! Middleware that records every exchange as a request and a response
//! `TxRecord`, pushed to a background writer.

use std::future::{Ready, ready};
use std::rc::Rc;
use std::sync::Arc;

use actix_web::body::{self, BoxBody, MessageBody};
use actix_web::dev::{Payload, Service, ServiceRequest, ServiceResponse, Transform, forward_ready};
use actix_web::error::PayloadError;
use actix_web::http::StatusCode;
use actix_web::http::header::{HOST, HeaderMap};
use actix_web::web::{Bytes, BytesMut};
use actix_web::{Error, HttpMessage, HttpResponse};
use futures::StreamExt;
use futures::future::LocalBoxFuture;
use txlog_services::CachedWriter;
use txlog_shared::TxRecord;

#[derive(Clone)]
pub struct RequestCapture {
    writer: Arc<dyn CachedWriter<TxRecord>>,
}

impl RequestCapture {
    pub fn new(writer: Arc<dyn CachedWriter<TxRecord>>) -> Self {
        Self { writer }
    }
}

impl<S, B> Transform<S, ServiceRequest> for RequestCapture
where
    S: Service<ServiceRequest, Response = ServiceResponse<B>, Error = Error> + 'static,
    B: MessageBody + 'static,
{
    type Response = ServiceResponse<BoxBody>;
    type Error = Error;
    type Transform = RequestCaptureMiddleware<S>;
    type InitError = ();
    type Future = Ready<Result<Self::Transform, Self::InitError>>;

    fn new_transform(&self, service: S) -> Self::Future {
        ready(Ok(RequestCaptureMiddleware {
            service: Rc::new(service),
            writer: Arc::clone(&self.writer),
        }))
    }
}

pub struct RequestCaptureMiddleware<S> {
    service: Rc<S>,
    writer: Arc<dyn CachedWriter<TxRecord>>,
}

impl<S, B> Service<ServiceRequest> for RequestCaptureMiddleware<S>
where
    S: Service<ServiceRequest, Response = ServiceResponse<B>, Error = Error> + 'static,
    B: MessageBody + 'static,
{
    type Response = ServiceResponse<BoxBody>;
    type Error = Error;
    type Future = LocalBoxFuture<'static, Result<Self::Response, Self::Error>>;

    forward_ready!(service);

    fn call(&self, mut req: ServiceRequest) -> Self::Future {
        let service = Rc::clone(&self.service);
        let writer = Arc::clone(&self.writer);

        Box::pin(async move {
            let host = request_host(&req);
            let scheme = if req.app_config().secure() { "https" } else { "http" };
            let target = req
                .uri()
                .path_and_query()
                .map(|pq| pq.as_str().to_string())
                .unwrap_or_else(|| req.path().to_string());
            let correlation_line = format!(
                "{} {}://{}{}",
                req.method(),
                scheme,
                String::from_utf8_lossy(&host),
                target
            );

            let head = request_head(&req, &host, &target);

            let body = match drain_body(&mut req).await {
                Ok(body) => body,
                Err(e) => {
                    log::error!("can't read body of {}: {}", correlation_line, e);
                    return Ok(req.into_response(HttpResponse::new(StatusCode::BAD_REQUEST)));
                }
            };

            writer.push(TxRecord::new(correlation_line.clone(), head, body.to_vec()));

            let (req, res) = service.call(req).await?.into_parts();
            let head = response_head(res.status(), res.headers());

            let (res, res_body) = res.into_parts();
            let bytes = match body::to_bytes(res_body).await {
                Ok(bytes) => bytes,
                Err(e) => {
                    let e: Box<dyn std::error::Error> = e.into();
                    log::error!("can't read response body of {}: {}", correlation_line, e);
                    return Ok(ServiceResponse::new(
                        req,
                        HttpResponse::new(StatusCode::INTERNAL_SERVER_ERROR),
                    ));
                }
            };

            writer.push(TxRecord::new(correlation_line, head, bytes.to_vec()));

            Ok(ServiceResponse::new(req, res.set_body(bytes).map_into_boxed_body()))
        })
    }
}

/// The `Host` the client sent; forwarding headers are ignored.
fn request_host(req: &ServiceRequest) -> Vec<u8> {
    if let Some(host) = req.headers().get(HOST) {
        return host.as_bytes().to_vec();
    }
    match req.uri().authority() {
        Some(authority) => authority.as_str().as_bytes().to_vec(),
        None => req.app_config().host().as_bytes().to_vec(),
    }
}

/// Request line, `Host`, then the remaining headers in name order,
/// terminated by a blank line.
fn request_head(req: &ServiceRequest, host: &[u8], target: &str) -> Vec<u8> {
    let mut head = format!("{} {} {:?}\r\n", req.method(), target, req.version()).into_bytes();
    head.extend_from_slice(b"Host: ");
    head.extend_from_slice(host);
    head.extend_from_slice(b"\r\n");
    write_headers(&mut head, req.headers());
    head.extend_from_slice(b"\r\n");
    head
}

/// Status line plus headers in name order.
fn response_head(status: StatusCode, headers: &HeaderMap) -> Vec<u8> {
    let mut head = format!(
        "HTTP/1.1 {} {}\r\n",
        status.as_u16(),
        status.canonical_reason().unwrap_or_default()
    )
    .into_bytes();
    write_headers(&mut head, headers);
    head
}

/// Values go out as raw bytes: obs-text and UTF-8 are legal on the wire.
fn write_headers(out: &mut Vec<u8>, headers: &HeaderMap) {
    let mut sorted: Vec<_> = headers.iter().filter(|(name, _)| **name != HOST).collect();
    sorted.sort_by(|a, b| a.0.as_str().cmp(b.0.as_str()));
    for (name, value) in sorted {
        out.extend_from_slice(canonical(name.as_str()).as_bytes());
        out.extend_from_slice(b": ");
        out.extend_from_slice(value.as_bytes());
        out.extend_from_slice(b"\r\n");
    }
}

/// `content-type` -> `Content-Type`.
fn canonical(name: &str) -> String {
    name.split('-')
        .map(|part| {
            let mut chars = part.chars();
            match chars.next() {
                Some(first) => first.to_ascii_uppercase().to_string() + chars.as_str(),
                None => String::new(),
            }
        })
        .collect::<Vec<_>>()
        .join("-")
}

async fn drain_body(req: &mut ServiceRequest) -> Result<Bytes, PayloadError> {
    let mut payload = req.take_payload();
    let mut buf = BytesMut::new();
    while let Some(chunk) = payload.next().await {
        buf.extend_from_slice(&chunk?);
    }
    let bytes = buf.freeze();
    req.set_payload(Payload::from(bytes.clone()));
    Ok(bytes)
}
