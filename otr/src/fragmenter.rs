/* This Source Code Form is subject to the terms of the Mozilla Public
 * License, v. 2.0. If a copy of the MPL was not distributed with this
 * file, You can obtain one at https://mozilla.org/MPL/2.0/.
 *
 * (c) ZeroTier, Inc.
 * https://www.zerotier.com/
 */
use crate::application::FragmenterInstructions;
use crate::instance_tag::InstanceTag;
use crate::proto::*;
use crate::result::FragmentError;

fn header_overhead(version: u16) -> Result<usize, FragmentError> {
    match version {
        PROTOCOL_VERSION_3 => Ok(FRAGMENT_HEADER_OVERHEAD_V3),
        PROTOCOL_VERSION_2 => Ok(FRAGMENT_HEADER_OVERHEAD_V2),
        _ => Err(FragmentError::NotAllowed),
    }
}

/// How many fragments `message_len` bytes of an encoded message will need under `instructions`.
pub fn number_of_fragments(
    message_len: usize,
    version: u16,
    instructions: &FragmenterInstructions,
) -> Result<usize, FragmentError> {
    if instructions.max_fragment_size >= message_len {
        return Ok(1);
    }
    let overhead = header_overhead(version)?;
    if overhead >= instructions.max_fragment_size {
        return Err(FragmentError::SizeTooSmall { max_fragment_size: instructions.max_fragment_size, overhead });
    }
    Ok(message_len.div_ceil(instructions.max_fragment_size - overhead))
}

/// Split an encoded message into fragments no larger than `instructions.max_fragment_size`.
///
/// A message that fits is returned unchanged as the only element.
pub(crate) fn fragment(
    message: &str,
    version: u16,
    sender: InstanceTag,
    receiver: InstanceTag,
    instructions: &FragmenterInstructions,
) -> Result<Vec<String>, FragmentError> {
    let n = number_of_fragments(message.len(), version, instructions)?;
    if n == 1 {
        return Ok(vec![message.to_string()]);
    }
    let allowed = instructions.max_fragments_allowed.min(MAX_FRAGMENTS);
    if n > allowed {
        return Err(FragmentError::TooManyFragments { needed: n, allowed });
    }
    // Encoded messages are pure ASCII so any byte offset is a char boundary.
    debug_assert!(message.is_ascii());
    let payload_size = instructions.max_fragment_size - header_overhead(version)?;
    let mut fragments = Vec::with_capacity(n);
    let mut remaining = message;
    let mut k = 1;
    while !remaining.is_empty() {
        let (payload, rest) = remaining.split_at(payload_size.min(remaining.len()));
        fragments.push(match version {
            PROTOCOL_VERSION_3 => format!(
                "{}{:08x}|{:08x},{:05},{:05},{},",
                FRAGMENT_PREFIX_V3,
                sender.value(),
                receiver.value(),
                k,
                n,
                payload
            ),
            _ => format!("{}{:05},{:05},{},", FRAGMENT_PREFIX_V2, k, n, payload),
        });
        remaining = rest;
        k += 1;
    }
    Ok(fragments)
}
