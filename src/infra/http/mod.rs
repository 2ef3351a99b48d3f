mod files;
mod middleware;
mod response;

pub use files::{FileState, build_router};
pub use middleware::{RequestContext, log_responses, set_request_context};
pub use response::{BufferedResponse, SharedBody, format_http_date};
