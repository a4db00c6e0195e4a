//! Channel identifiers of the form `network#node:path/transport` and the
//! path generator used to wire fan-in / fan-out stages.

pub use skein::contract::Transport;

use std::fmt;

const MAX_SEGMENT_LENGTH: usize = 31;

/// One name segment: 1..=31 characters, a letter first, then letters,
/// digits, `-` or `_`.
pub fn valid_name_segment(segment: &str) -> bool {
    if segment.is_empty() || segment.len() > MAX_SEGMENT_LENGTH {
        return false;
    }

    let mut characters = segment.chars();

    match characters.next() {
        Some(first) if first.is_ascii_alphabetic() => (),
        _ => return false,
    }

    characters.all(|character| character.is_ascii_alphanumeric() || character == '-' || character == '_')
}

/// The network part is optional; empty means local.
pub fn valid_network(network: &str) -> bool {
    network.is_empty() || valid_name_segment(network)
}

pub fn valid_node(node: &str) -> bool {
    valid_name_segment(node)
}

/// A path is a `/`-led sequence of name segments.
pub fn valid_path(path: &str) -> bool {
    match path.strip_prefix('/') {
        Some("") => false,
        Some(rest) => rest.split('/').all(valid_name_segment),
        None => false,
    }
}

pub fn valid_transport(transport: &str) -> bool {
    Transport::from_name(transport).is_some()
}

/// A fully parsed channel identifier.
#[derive(Debug, Clone, Eq, PartialEq)]
pub struct ChannelName {
    network: String,
    node: String,
    path: String,
    transport: Transport,
}

impl ChannelName {
    pub fn new(network: &str, node: &str, path: &str, transport: Transport) -> Result<ChannelName, String> {
        if !valid_network(network) {
            return Err(format!("Invalid network name '{}'", network));
        }
        if !valid_node(node) {
            return Err(format!("Invalid node name '{}'", node));
        }
        if !valid_path(path) {
            return Err(format!("Invalid channel path '{}'", path));
        }

        Ok(ChannelName {
            network: network.to_string(),
            node: node.to_string(),
            path: path.to_string(),
            transport,
        })
    }

    /// Parse the canonical form. The failure reason is returned on the
    /// error side.
    pub fn parse(text: &str) -> Result<ChannelName, String> {
        let (network, rest) = match text.find('#') {
            Some(position) => (&text[..position], &text[position + 1..]),
            None => ("", text),
        };

        let colon = match rest.find(':') {
            Some(position) => position,
            None => return Err("Missing ':' between node and path".to_string()),
        };
        let node = &rest[..colon];
        let mut path = &rest[colon + 1..];

        // A trailing /transport is distinguished from a path segment by
        // naming a known transport.
        let mut transport = Transport::Any;
        if let Some(position) = path.rfind('/') {
            let candidate = &path[position + 1..];

            if let Some(selected) = Transport::from_name(candidate) {
                transport = selected;
                path = &path[..position];
            }
        }

        ChannelName::new(network, node, path, transport)
    }

    #[inline]
    pub fn network(&self) -> &str {
        &self.network
    }

    #[inline]
    pub fn node(&self) -> &str {
        &self.node
    }

    #[inline]
    pub fn path(&self) -> &str {
        &self.path
    }

    #[inline]
    pub fn transport(&self) -> Transport {
        self.transport
    }

    /// The canonical textual form; defaulted parts are omitted.
    pub fn canonical(&self) -> String {
        let mut rendered = String::new();

        if !self.network.is_empty() {
            rendered.push_str(&self.network);
            rendered.push('#');
        }
        rendered.push_str(&self.node);
        rendered.push(':');
        rendered.push_str(&self.path);
        if self.transport != Transport::Any {
            rendered.push('/');
            rendered.push_str(self.transport.name());
        }

        rendered
    }

    /// Materialize the path for one of a node's numbered channels.
    ///
    /// With a single channel the base is used as-is; with several, the
    /// 1-based index is appended, zero-padded to the width of
    /// `num_channels - 1` so that lexicographic order equals numeric order.
    /// Callers that want every channel numbered (even the last) pass one
    /// more than the real channel count.
    pub fn generate_path(
        base: &str,
        for_output: bool,
        num_channels: usize,
        channel_index: usize,
        out: &mut String,
    ) -> bool {
        if num_channels == 0 || channel_index == 0 || channel_index > num_channels {
            return false;
        }

        let mut stem = if base.is_empty() {
            if for_output { "/out".to_string() } else { "/in".to_string() }
        } else if base.starts_with('/') {
            base.to_string()
        } else {
            format!("/{}", base)
        };

        if !valid_path(&stem) {
            return false;
        }

        if num_channels > 1 {
            let width = (num_channels - 1).to_string().len();

            stem.push_str(&format!("{:0width$}", channel_index, width = width));
        }

        out.clear();
        out.push_str(&stem);

        true
    }
}

impl fmt::Display for ChannelName {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.write_str(&self.canonical())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_segment_rules() {
        assert!(valid_name_segment("alpha"));
        assert!(valid_name_segment("a1-b_2"));
        assert!(!valid_name_segment(""));
        assert!(!valid_name_segment("1bad"));
        assert!(!valid_name_segment("-bad"));
        assert!(!valid_name_segment("has space"));
        assert!(valid_name_segment(&"x".repeat(31)));
        assert!(!valid_name_segment(&"x".repeat(32)));
    }

    #[test]
    fn test_network_optional_node_required() {
        assert!(valid_network(""));
        assert!(valid_network("lab"));
        assert!(!valid_network("9lab"));
        assert!(!valid_node(""));
        assert!(valid_node("worker1"));
    }

    #[test]
    fn test_path_rules() {
        assert!(valid_path("/in"));
        assert!(valid_path("/stage/one"));
        assert!(!valid_path("bare"));
        assert!(!valid_path("/"));
        assert!(!valid_path("/a//b"));
        assert!(!valid_path("/a/2b"));
    }

    #[test]
    fn test_transport_names() {
        assert!(valid_transport("TCP"));
        assert!(valid_transport("UDP"));
        assert!(valid_transport("Any"));
        assert!(!valid_transport("tcp"));
        assert!(!valid_transport("SCTP"));
    }

    #[test]
    fn test_parse_full_form() {
        let name = ChannelName::parse("lab#worker:/data/main/TCP").unwrap();

        assert_eq!(name.network(), "lab");
        assert_eq!(name.node(), "worker");
        assert_eq!(name.path(), "/data/main");
        assert_eq!(name.transport(), Transport::Tcp);
    }

    #[test]
    fn test_parse_defaulted_parts() {
        let name = ChannelName::parse("worker:/data").unwrap();

        assert_eq!(name.network(), "");
        assert_eq!(name.transport(), Transport::Any);
        assert_eq!(name.canonical(), "worker:/data");
    }

    #[test]
    fn test_parse_failures_carry_reasons() {
        assert!(ChannelName::parse("worker/data").is_err());
        assert!(ChannelName::parse("1bad:/data").unwrap_err().contains("node"));
        assert!(ChannelName::parse("lab#worker:data").unwrap_err().contains("path"));
        assert!(ChannelName::parse("9net#worker:/data").unwrap_err().contains("network"));
    }

    #[test]
    fn test_parse_canonical_is_identity() {
        for text in &[
            "worker:/data",
            "lab#worker:/data",
            "worker:/data/UDP",
            "lab#worker:/stage/one/TCP",
        ] {
            let name = ChannelName::parse(text).unwrap();

            assert_eq!(ChannelName::parse(&name.canonical()).unwrap(), name);
            assert_eq!(name.canonical(), *text);
        }
    }

    #[test]
    fn test_generate_path_defaults() {
        let mut path = String::new();

        assert!(ChannelName::generate_path("", true, 1, 1, &mut path));
        assert_eq!(path, "/out");
        assert!(ChannelName::generate_path("", false, 1, 1, &mut path));
        assert_eq!(path, "/in");
        assert!(ChannelName::generate_path("data", false, 1, 1, &mut path));
        assert_eq!(path, "/data");
    }

    #[test]
    fn test_generate_path_padding() {
        let mut path = String::new();

        assert!(ChannelName::generate_path("/data", true, 11, 3, &mut path));
        assert_eq!(path, "/data03");

        assert!(ChannelName::generate_path("/data", true, 5, 3, &mut path));
        assert_eq!(path, "/data3");

        assert!(ChannelName::generate_path("", false, 11, 10, &mut path));
        assert_eq!(path, "/in10");
    }

    #[test]
    fn test_generate_path_rejects_bad_input() {
        let mut path = String::new();

        assert!(!ChannelName::generate_path("/data", true, 0, 1, &mut path));
        assert!(!ChannelName::generate_path("/data", true, 4, 0, &mut path));
        assert!(!ChannelName::generate_path("/data", true, 4, 5, &mut path));
        assert!(!ChannelName::generate_path("/9bad", true, 1, 1, &mut path));
    }

    #[test]
    fn test_generated_paths_distinct_and_sorted() {
        let num = 12;
        let mut paths = Vec::new();

        for index in 1..=num {
            let mut path = String::new();

            assert!(ChannelName::generate_path("/data", false, num, index, &mut path));
            paths.push(path);
        }

        let mut sorted = paths.clone();
        sorted.sort();

        assert_eq!(sorted, paths);
        sorted.dedup();
        assert_eq!(sorted.len(), num);
    }
}
