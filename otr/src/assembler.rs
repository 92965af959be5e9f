/* This Source Code Form is subject to the terms of the Mozilla Public
 * License, v. 2.0. If a copy of the MPL was not distributed with this
 * file, You can obtain one at https://mozilla.org/MPL/2.0/.
 *
 * (c) ZeroTier, Inc.
 * https://www.zerotier.com/
 */
use std::collections::HashMap;

use crate::instance_tag::InstanceTag;
use crate::proto::*;
use crate::result::{fault, FaultType, ReceiveError};

struct FragmentBuffer {
    k: usize,
    n: usize,
    started: u64,
    text: String,
}

/// Reassembles fragmented messages, one buffer per sending instance.
///
/// Version 2 fragments carry no instance tags and share the buffer of `InstanceTag::ZERO`.
/// At most `MAX_FRAGMENT_BUFFERS` partial messages are held; starting another evicts the oldest.
pub(crate) struct Assembler {
    local_tag: InstanceTag,
    buffers: HashMap<InstanceTag, FragmentBuffer>,
    counter: u64,
}

fn parse_index(field: &str) -> Result<usize, ReceiveError> {
    if field.is_empty() || !field.bytes().all(|b| b.is_ascii_digit()) {
        return Err(fault!(FaultType::InvalidFragment));
    }
    let index = field.parse::<usize>().map_err(|_| fault!(FaultType::InvalidFragment))?;
    if index == 0 || index > MAX_FRAGMENTS {
        return Err(fault!(FaultType::InvalidFragment));
    }
    Ok(index)
}

fn parse_tag(field: &str) -> Result<InstanceTag, ReceiveError> {
    if field.len() != 8 {
        return Err(fault!(FaultType::InvalidFragment));
    }
    let tag = u32::from_str_radix(field, 16).map_err(|_| fault!(FaultType::InvalidFragment))?;
    let tag = InstanceTag::from_raw(tag);
    if tag.is_valid() {
        Ok(tag)
    } else {
        Err(fault!(FaultType::InvalidInstanceTag))
    }
}

/// `k,n,payload,` with nothing after the final comma.
fn parse_body(body: &str) -> Result<(usize, usize, &str), ReceiveError> {
    let fields: Vec<&str> = body.split(',').collect();
    if fields.len() != 4 || !fields[3].is_empty() {
        return Err(fault!(FaultType::InvalidFragment));
    }
    let k = parse_index(fields[0])?;
    let n = parse_index(fields[1])?;
    if k > n {
        return Err(fault!(FaultType::InvalidFragment));
    }
    Ok((k, n, fields[2]))
}

impl Assembler {
    pub fn new(local_tag: InstanceTag) -> Self {
        Self { local_tag, buffers: HashMap::new(), counter: 0 }
    }

    /// True if `text` looks like a fragment of either version.
    pub fn is_fragment(text: &str) -> bool {
        text.starts_with(FRAGMENT_PREFIX_V3) || text.starts_with(FRAGMENT_PREFIX_V2)
    }

    /// Feed one incoming message through the assembler.
    ///
    /// Returns the complete message once all fragments arrived, `None` while more are awaited,
    /// and non-fragments unchanged. Any malformed or out of order fragment discards the partial
    /// message it belonged to.
    pub fn accumulate(&mut self, text: &str) -> Result<Option<String>, ReceiveError> {
        let (sender, body) = if let Some(rest) = text.strip_prefix(FRAGMENT_PREFIX_V3) {
            let (sender, rest) = rest.split_once('|').ok_or(fault!(FaultType::InvalidFragment))?;
            let (receiver, body) = rest.split_once(',').ok_or(fault!(FaultType::InvalidFragment))?;
            let sender = parse_tag(sender)?;
            let receiver = parse_tag(receiver)?;
            if sender.is_zero() {
                return Err(fault!(FaultType::InvalidInstanceTag));
            }
            if !receiver.is_zero() && receiver != self.local_tag {
                return Err(ReceiveError::UnknownInstance);
            }
            (sender, body)
        } else if let Some(body) = text.strip_prefix(FRAGMENT_PREFIX_V2) {
            (InstanceTag::ZERO, body)
        } else {
            self.buffers.clear();
            return Ok(Some(text.to_string()));
        };

        let (k, n, payload) = match parse_body(body) {
            Ok(parsed) => parsed,
            Err(e) => {
                self.buffers.remove(&sender);
                return Err(e);
            }
        };
        if k == 1 {
            if !self.buffers.contains_key(&sender) && self.buffers.len() >= MAX_FRAGMENT_BUFFERS {
                let oldest = self.buffers.iter().min_by_key(|(_, b)| b.started).map(|(tag, _)| *tag);
                if let Some(oldest) = oldest {
                    self.buffers.remove(&oldest);
                }
            }
            self.counter += 1;
            let buffer = FragmentBuffer { k, n, started: self.counter, text: payload.to_string() };
            self.buffers.insert(sender, buffer);
        } else {
            match self.buffers.get_mut(&sender) {
                Some(buffer) if buffer.k + 1 == k && buffer.n == n => {
                    buffer.k = k;
                    buffer.text.push_str(payload);
                }
                _ => {
                    self.buffers.remove(&sender);
                    return Err(fault!(FaultType::UnexpectedFragment));
                }
            }
        }
        if k == n {
            Ok(self.buffers.remove(&sender).map(|buffer| buffer.text))
        } else {
            Ok(None)
        }
    }

    #[cfg(test)]
    fn buffer_count(&self) -> usize {
        self.buffers.len()
    }

    #[cfg(test)]
    fn is_buffering(&self, sender: InstanceTag) -> bool {
        self.buffers.contains_key(&sender)
    }
}
