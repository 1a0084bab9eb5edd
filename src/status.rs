use std::sync::Arc;

use tokio::sync::broadcast;
use tracing::{debug, error, info, warn};

use crate::frame::{Line, MessageLevel};
use crate::object::ObjectGraph;
use crate::reply::{Reply, ReplyRegistry};
use crate::util;

/// A log message emitted by the radio on an `M` line.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RadioMessage {
    pub level: MessageLevel,
    pub text: String,
}

/// Demultiplexes inbound lines: replies to the registry, status bodies to
/// the object graph, everything else to metadata sinks. Runs on a single
/// task and is the object graph's only writer.
#[derive(Debug)]
pub(crate) struct StatusRouter {
    graph: ObjectGraph,
    registry: Arc<ReplyRegistry>,
    messages: broadcast::Sender<RadioMessage>,
}

impl StatusRouter {
    pub fn new(
        graph: ObjectGraph,
        registry: Arc<ReplyRegistry>,
        messages: broadcast::Sender<RadioMessage>,
    ) -> Self {
        Self {
            graph,
            registry,
            messages,
        }
    }

    pub fn route(&self, line: Line) {
        match line {
            Line::Reply { seq, code, message } => {
                self.registry.complete(Reply { seq, code, message });
            }
            Line::Status { body, .. } => self.route_status(&body),
            Line::Message { level, text } => {
                match level {
                    MessageLevel::Info => info!(target: "flexlink::radio", "{}", text),
                    MessageLevel::Warning => warn!(target: "flexlink::radio", "{}", text),
                    MessageLevel::Error | MessageLevel::Fatal => {
                        error!(target: "flexlink::radio", "{}", text)
                    }
                }
                let _ = self.messages.send(RadioMessage { level, text });
            }
            Line::Version(version) => debug!("radio version banner: {}", version),
            // the handshake consumed the real handle; a later one is noise
            Line::Handle(handle) => {
                warn!("ignoring duplicate handle banner {:#x}", handle)
            }
            Line::Command { seq, .. } => {
                warn!(seq, "ignoring echoed command line")
            }
        }
    }

    fn route_status(&self, body: &str) {
        let mut tokens = body.split_whitespace();
        let Some(object_type) = tokens.next() else {
            debug!("dropping empty status body");
            return;
        };
        let Some(selector) = tokens.next() else {
            debug!(object_type, "dropping status without selector");
            return;
        };

        let mut removed = false;
        let mut kvs: Vec<(String, String)> = Vec::new();
        for token in tokens {
            if token == "removed" {
                removed = true;
                continue;
            }
            match token.split_once('=') {
                Some((key, value)) => {
                    kvs.push((key.to_string(), util::unescape_spaces(value)))
                }
                None => debug!(object_type, "ignoring bare status token: {}", token),
            }
        }

        match object_type {
            "slice" => {
                let Ok(index) = util::parse_u32(selector) else {
                    warn!("dropping slice status with bad selector: {}", selector);
                    return;
                };
                if removed {
                    self.graph.remove_slice(index);
                } else {
                    self.graph.apply_slice(index, &kvs);
                }
            }
            "pan" => {
                let Ok(stream_id) = util::parse_u32(selector) else {
                    warn!("dropping pan status with bad selector: {}", selector);
                    return;
                };
                if removed {
                    self.graph.remove_panadapter(stream_id);
                } else {
                    self.graph.apply_panadapter(stream_id, &kvs);
                }
            }
            "waterfall" => {
                let Ok(stream_id) = util::parse_u32(selector) else {
                    warn!("dropping waterfall status with bad selector: {}", selector);
                    return;
                };
                if removed {
                    self.graph.remove_waterfall(stream_id);
                } else {
                    self.graph.apply_waterfall(stream_id, &kvs);
                }
            }
            "meter" => {
                let Ok(index) = util::parse_u32(selector) else {
                    warn!("dropping meter status with bad selector: {}", selector);
                    return;
                };
                let Ok(index) = u16::try_from(index) else {
                    warn!("dropping meter status with oversized index: {}", index);
                    return;
                };
                if removed {
                    self.graph.remove_meter(index);
                } else {
                    self.graph.apply_meter(index, &kvs);
                }
            }
            "audio_stream" => {
                let Ok(stream_id) = util::parse_u32(selector) else {
                    warn!(
                        "dropping audio_stream status with bad selector: {}",
                        selector
                    );
                    return;
                };
                if removed {
                    self.graph.remove_audio_stream(stream_id);
                } else {
                    self.graph.apply_audio_stream(stream_id, &kvs);
                }
            }
            "usb_cable" => {
                if removed {
                    self.graph.remove_usb_cable(selector);
                } else {
                    self.graph.apply_usb_cable(selector, &kvs);
                }
            }
            "memory" => {
                let Ok(index) = util::parse_u32(selector) else {
                    warn!("dropping memory status with bad selector: {}", selector);
                    return;
                };
                if removed {
                    self.graph.remove_memory(index);
                } else {
                    self.graph.apply_memory(index, &kvs);
                }
            }
            other => {
                debug!("dropping status for unknown object type: {}", other);
            }
        }
    }
}
