use fg_domain::error::Error;

/// Map a reqwest error onto the shared error type.
pub(crate) fn from_reqwest(e: reqwest::Error) -> Error {
    if e.is_timeout() {
        Error::Timeout(e.to_string())
    } else if e.is_connect() {
        Error::Http(format!("connect: {e}"))
    } else {
        Error::Http(e.to_string())
    }
}
