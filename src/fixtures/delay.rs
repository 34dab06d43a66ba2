//! Answers after a delay.

use crate::prelude::*;

/// Sleeps for the number of milliseconds in the query, then answers
/// `200 text/plain` `OK (<ms>ms delayed)\n`.
///
/// A query which isn't a non-negative integer means no delay.
#[derive(Debug)]
pub struct Delay;
impl Handler for Delay {
    fn handle<'a>(&'a self, request: &'a Request) -> RetFut<'a, Result<Response<Bytes>, Error>> {
        box_fut!({
            let ms: u64 = request.query().parse().unwrap_or(0);
            if ms > 0 {
                tokio::time::sleep(Duration::from_millis(ms)).await;
            }
            super::response(
                StatusCode::OK,
                "text/plain",
                format!("OK ({ms}ms delayed)\n"),
            )
        })
    }
}
