use std::sync::Mutex;

use serde_json::Value;
use tracing::debug;

use crate::error::{Result, ServiceError};
use crate::protocol::{ClipAddress, ClipHandle, ClipKind, Location, Reply, Request};
use crate::transport::Transport;

/// Typed wrapper around the primitive Timeline Service calls.
///
/// Owns no editing logic. Every method is exactly one synchronous round trip,
/// and reply shapes are normalized before they leave this type.
#[derive(Debug)]
pub struct ServiceClient<T> {
    transport: Mutex<T>,
}

impl<T> ServiceClient<T>
where
    T: Transport,
{
    pub fn new(transport: T) -> Self {
        Self {
            transport: Mutex::new(transport),
        }
    }

    /// Creates a clip. Arrangement audio clips cannot take a `length`.
    pub fn create_clip(
        &self,
        track_index: usize,
        location: Location,
        length: Option<f64>,
        kind: ClipKind,
        file_path: Option<&str>,
    ) -> Result<ClipHandle> {
        let result = self.call(&Request::CreateClip {
            track_index,
            location,
            length,
            kind,
            file_path: file_path.map(str::to_owned),
        })?;
        let mut handle = ClipHandle::from_value(result, "create_clip")?;
        fill_start_from_location(&mut handle, location);
        Ok(handle)
    }

    /// Duplicates a clip on its own track.
    ///
    /// The host answers either `"id"` or `["id", start_time]`. When only the
    /// identifier comes back, the start is taken from the destination.
    pub fn duplicate_clip(&self, clip: &ClipAddress, destination: Location) -> Result<ClipHandle> {
        let result = self.call(&Request::DuplicateClip {
            clip: clip.clone(),
            destination,
        })?;
        let mut handle = ClipHandle::from_value(result, "duplicate_clip")?;
        fill_start_from_location(&mut handle, destination);
        Ok(handle)
    }

    pub fn delete_clip(&self, clip: &ClipAddress) -> Result<()> {
        self.call(&Request::DeleteClip { clip: clip.clone() })?;
        Ok(())
    }

    pub fn get_clip_property(&self, clip: &ClipAddress, name: &str) -> Result<Value> {
        self.call(&Request::GetClipProperty {
            clip: clip.clone(),
            name: name.to_owned(),
        })
    }

    pub fn set_clip_property(&self, clip: &ClipAddress, name: &str, value: Value) -> Result<()> {
        self.call(&Request::SetClipProperty {
            clip: clip.clone(),
            name: name.to_owned(),
            value,
        })?;
        Ok(())
    }

    /// Lists the arrangement clips of a track in timeline order.
    pub fn track_clips(&self, track_index: usize) -> Result<Vec<ClipHandle>> {
        let result = self.call(&Request::GetTrackClips { track_index })?;
        let Value::Array(entries) = result else {
            return Err(ServiceError::UnexpectedReply {
                context: "get_track_clips",
                value: result.to_string(),
            });
        };
        entries
            .into_iter()
            .map(|entry| ClipHandle::from_value(entry, "get_track_clips entry"))
            .collect()
    }

    fn call(&self, request: &Request) -> Result<Value> {
        let command = request.command();
        let payload = serde_json::to_string(request)?;
        debug!(command, payload = %payload, "timeline service request");

        let raw = {
            let mut transport = self
                .transport
                .lock()
                .map_err(|_| ServiceError::TransportPoisoned)?;
            transport.exchange(&payload)?
        };

        let reply: Reply = serde_json::from_str(&raw).map_err(|source| ServiceError::Decode {
            payload: raw.clone(),
            source,
        })?;
        let result = reply.into_result(command);
        if let Err(error) = &result {
            debug!(command, %error, "timeline service error reply");
        }
        result
    }
}

fn fill_start_from_location(handle: &mut ClipHandle, location: Location) {
    if handle.start_time.is_none() {
        if let Location::Arrangement { start_time } = location {
            handle.start_time = Some(start_time);
        }
    }
}

#[cfg(test)]
mod tests {
    use std::collections::VecDeque;

    use serde_json::json;

    use super::ServiceClient;
    use crate::error::{Result, ServiceError};
    use crate::protocol::{ClipAddress, Location};
    use crate::transport::Transport;

    #[derive(Debug, Default)]
    struct ScriptedTransport {
        replies: VecDeque<String>,
        sent: Vec<String>,
    }

    impl ScriptedTransport {
        fn with_replies(replies: &[&str]) -> Self {
            Self {
                replies: replies.iter().map(|reply| reply.to_string()).collect(),
                sent: Vec::new(),
            }
        }
    }

    impl Transport for ScriptedTransport {
        fn exchange(&mut self, request: &str) -> Result<String> {
            self.sent.push(request.to_string());
            self.replies.pop_front().ok_or(ServiceError::ConnectionClosed)
        }
    }

    #[test]
    fn duplicate_with_plain_identifier_takes_start_from_destination() {
        let client = ServiceClient::new(ScriptedTransport::with_replies(&[
            r#"{"status":"success","result":"c9"}"#,
        ]));

        let handle = client
            .duplicate_clip(
                &ClipAddress::arrangement(0, "c1"),
                Location::Arrangement { start_time: 24.0 },
            )
            .expect("duplicate should succeed");

        assert_eq!(handle.clip_id, "c9");
        assert_eq!(handle.start_time, Some(24.0));
    }

    #[test]
    fn duplicate_with_pair_reply_keeps_reported_start() {
        let client = ServiceClient::new(ScriptedTransport::with_replies(&[
            r#"{"status":"success","result":["c9", 23.5]}"#,
        ]));

        let handle = client
            .duplicate_clip(
                &ClipAddress::arrangement(0, "c1"),
                Location::Arrangement { start_time: 24.0 },
            )
            .expect("duplicate should succeed");

        assert_eq!(handle.start_time, Some(23.5));
    }

    #[test]
    fn track_clips_accepts_mixed_entry_shapes() {
        let client = ServiceClient::new(ScriptedTransport::with_replies(&[
            r#"{"status":"success","result":["a", ["b", 8.0]]}"#,
        ]));

        let handles = client.track_clips(3).expect("query should succeed");

        assert_eq!(handles.len(), 2);
        assert_eq!(handles[0].start_time, None);
        assert_eq!(handles[1].clip_id, "b");
        assert_eq!(handles[1].start_time, Some(8.0));
    }

    #[test]
    fn malformed_reply_is_a_decode_error() {
        let client = ServiceClient::new(ScriptedTransport::with_replies(&["not json"]));

        let result = client.get_clip_property(&ClipAddress::session(0, 2), "looping");

        assert!(matches!(result, Err(ServiceError::Decode { .. })));
        assert!(
            result
                .err()
                .map(|error| error.is_transport_failure())
                .unwrap_or(false)
        );
    }

    #[test]
    fn set_property_sends_json_value() {
        let client = ServiceClient::new(ScriptedTransport::with_replies(&[
            r#"{"status":"success"}"#,
        ]));

        client
            .set_clip_property(&ClipAddress::arrangement(1, "c4"), "looping", json!(true))
            .expect("set should succeed");

        let transport = client.transport.lock().expect("lock transport");
        let sent: serde_json::Value =
            serde_json::from_str(&transport.sent[0]).expect("request should be json");
        assert_eq!(sent["type"], "set_clip_property");
        assert_eq!(sent["params"]["value"], json!(true));
        assert_eq!(sent["params"]["clip"]["clip_id"], "c4");
    }
}
