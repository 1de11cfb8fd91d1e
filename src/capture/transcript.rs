//! Render captured flows into the `>>>` / `<<<` text transcript consumed
//! by the fingerprinter.

use crate::capture::flows::Flow;

/// Render flows as an interleaved request/response transcript.
///
/// Requests open with `>>> METHOD PATH HTTP/1.1`, responses with
/// `<<< HTTP/1.1 STATUS`; headers follow, then a blank line, then the body.
pub fn render_transcript(flows: &[Flow]) -> String {
    let mut out = String::new();

    for flow in flows {
        let req = &flow.request;
        out.push_str(&format!(">>> {} {} HTTP/1.1\n", req.method, req.path()));
        for (name, value) in &req.headers {
            out.push_str(&format!("{}: {}\n", name, value));
        }
        out.push('\n');
        if let Some(body) = &req.content {
            out.push_str(body);
            out.push('\n');
        }

        if let Some(resp) = &flow.response {
            out.push_str(&format!("<<< HTTP/1.1 {}\n", resp.status_code));
            for (name, value) in &resp.headers {
                out.push_str(&format!("{}: {}\n", name, value));
            }
            out.push('\n');
            if let Some(body) = &resp.content {
                out.push_str(body);
                out.push('\n');
            }
        } else {
            // Fingerprinting needs paired blocks; an unanswered request
            // still gets an empty response marker.
            out.push_str("<<< HTTP/1.1 0\n\n");
        }
    }

    out
}
