//! Value types exchanged between the transport, matchers and actions.

mod action;
mod delay;
mod request;
mod response;

pub use action::{Action, HttpCallback, HttpError, HttpForward, HttpTemplate, TemplateType};
pub use delay::{Delay, TimeUnit};
pub use request::{
    parse_cookie_header, parse_query_string, Certificate, HttpRequest, Protocol, Scheme,
    SocketAddress,
};
pub use response::{HttpResponse, ResponseBody};
