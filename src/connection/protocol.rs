use crate::connection::pkt_line::{PktLine, PktLineReader, PktLineWriter};
use crate::errors::{GitError, Result};
use crate::objects::id::is_hex_id;
use crate::objects::ObjectId;
use bytes::Bytes;
use std::collections::HashMap;

/// Identifier a server advertises when a repository has no refs yet.
const ZERO_ID: &str = "0000000000000000000000000000000000000000";

/// Capabilities this client asserts when the server advertises them.
const CLIENT_CAPS: &[&str] = &[
    "multi_ack_detailed",
    "side-band-64k",
    "ofs-delta",
    "no-progress",
    "shallow",
    "deepen-since",
    "filter",
];

/// The parsed result of reference discovery: refname → identifier, the
/// symbolic-ref map from `symref=` capabilities, peeled tag targets, and
/// the server's capability list.
#[derive(Debug, Default)]
pub struct RefAdvertisement {
    pub refs: HashMap<String, ObjectId>,
    pub symrefs: HashMap<String, String>,
    pub peeled: HashMap<String, ObjectId>,
    pub capabilities: Vec<String>,
}

impl RefAdvertisement {
    /// Parses an upload-pack advertisement, tolerating the smart-HTTP
    /// `# service=` preamble. Only the first ref line carries
    /// capabilities; unknown capabilities are ignored.
    pub fn parse(body: &[u8]) -> Result<Self> {
        let mut advert = RefAdvertisement::default();
        let mut reader = PktLineReader::new(body);
        let mut saw_caps = false;

        while let Some(line) = reader.next_line()? {
            let payload = match line {
                PktLine::Flush => continue,
                PktLine::Data(p) => p,
            };
            if payload.is_empty() || payload[0] == b'#' {
                continue;
            }

            let text = std::str::from_utf8(payload)
                .map_err(|_| GitError::protocol("ref advertisement line is not UTF-8"))?
                .trim_end_matches('\n');

            let (ref_part, caps_part) = match text.split_once('\0') {
                Some((r, c)) => (r, Some(c)),
                None => (text, None),
            };
            if let Some(caps) = caps_part {
                if !saw_caps {
                    advert.capabilities = caps.split_whitespace().map(str::to_string).collect();
                    advert.extract_symrefs();
                    saw_caps = true;
                }
            }

            let (hex, name) = ref_part.split_once(' ').ok_or_else(|| {
                GitError::protocol(format!("malformed ref advertisement line: {text:?}"))
            })?;
            if hex == ZERO_ID && name == "capabilities^{}" {
                continue;
            }
            let id = ObjectId::from_hex(hex)
                .map_err(|_| GitError::protocol(format!("invalid identifier in advertisement: {hex:?}")))?;

            if let Some(base) = name.strip_suffix("^{}") {
                advert.peeled.insert(base.to_string(), id);
            } else {
                advert.refs.insert(name.to_string(), id);
            }
        }

        Ok(advert)
    }

    fn extract_symrefs(&mut self) {
        for cap in &self.capabilities {
            if let Some(mapping) = cap.strip_prefix("symref=") {
                if let Some((from, to)) = mapping.split_once(':') {
                    self.symrefs.insert(from.to_string(), to.to_string());
                }
            }
        }
    }

    pub fn supports(&self, capability: &str) -> bool {
        self.capabilities.iter().any(|c| c == capability)
    }

    /// The refname a symbolic reference points at, e.g. `HEAD`.
    pub fn symref_target(&self, name: &str) -> Option<&str> {
        self.symrefs.get(name).map(String::as_str)
    }

    /// Resolves a commitish: a 40-hex string is taken as an identifier;
    /// otherwise the name is tried as an exact refname, a branch, a tag,
    /// and finally a symbolic reference.
    pub fn resolve(&self, name: &str) -> Option<ObjectId> {
        if is_hex_id(name) {
            return ObjectId::from_hex(name).ok();
        }
        if let Some(id) = self.refs.get(name) {
            return Some(*id);
        }
        for prefix in ["refs/heads/", "refs/tags/"] {
            if let Some(id) = self.refs.get(&format!("{prefix}{name}")) {
                return Some(*id);
            }
        }
        self.symref_target(name)
            .and_then(|target| self.refs.get(target).copied())
    }

    /// The commit a tag ref was peeled to, when the server advertised it.
    pub fn peeled_target(&self, refname: &str) -> Option<ObjectId> {
        self.peeled.get(refname).copied()
    }
}

/// Which object filter to ask the server to apply.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FetchFilter {
    /// `filter blob:none`: commits and trees only.
    BlobNone,
}

impl FetchFilter {
    fn spec(self) -> &'static str {
        match self {
            FetchFilter::BlobNone => "blob:none",
        }
    }
}

/// Parameters of one upload-pack fetch.
#[derive(Debug, Clone, Default)]
pub struct FetchRequest {
    pub wants: Vec<ObjectId>,
    pub haves: Vec<ObjectId>,
    pub depth: Option<u32>,
    pub deepen_since: Option<i64>,
    pub deepen_not: Option<String>,
    pub filter: Option<FetchFilter>,
}

impl FetchRequest {
    pub fn new(wants: Vec<ObjectId>) -> Self {
        FetchRequest {
            wants,
            ..Default::default()
        }
    }

    /// Limits commit history to `n` commits from each want.
    pub fn with_depth(mut self, n: u32) -> Self {
        self.depth = Some(n);
        self
    }

    /// Asks the server to omit all blobs.
    pub fn blobless(mut self) -> Self {
        self.filter = Some(FetchFilter::BlobNone);
        self
    }

    pub fn with_haves(mut self, haves: Vec<ObjectId>) -> Self {
        self.haves = haves;
        self
    }
}

/// Builds the pkt-line framed request body and reports whether the
/// exchange will be side-band multiplexed.
pub(crate) fn build_upload_pack_request(
    request: &FetchRequest,
    advert: &RefAdvertisement,
) -> Result<(Bytes, bool)> {
    if request.wants.is_empty() {
        return Err(GitError::protocol("a fetch needs at least one want"));
    }
    if request.filter.is_some() && !advert.supports("filter") {
        return Err(GitError::protocol("server does not support object filters"));
    }
    if request.depth.is_some() && !advert.supports("shallow") {
        return Err(GitError::protocol("server does not support shallow fetches"));
    }
    if request.deepen_since.is_some() && !advert.supports("deepen-since") {
        return Err(GitError::protocol("server does not support deepen-since"));
    }

    let caps: Vec<&str> = CLIENT_CAPS
        .iter()
        .copied()
        .filter(|cap| advert.supports(cap))
        .collect();
    let sideband = caps.contains(&"side-band-64k");

    let mut writer = PktLineWriter::new();
    for (i, want) in request.wants.iter().enumerate() {
        if i == 0 && !caps.is_empty() {
            writer.write_text(&format!("want {want} {}\n", caps.join(" ")));
        } else {
            writer.write_text(&format!("want {want}\n"));
        }
    }
    if let Some(depth) = request.depth {
        writer.write_text(&format!("deepen {depth}\n"));
    }
    if let Some(since) = request.deepen_since {
        writer.write_text(&format!("deepen-since {since}\n"));
    }
    if let Some(not) = &request.deepen_not {
        writer.write_text(&format!("deepen-not {not}\n"));
    }
    if let Some(filter) = request.filter {
        writer.write_text(&format!("filter {}\n", filter.spec()));
    }
    writer.flush();
    for have in &request.haves {
        writer.write_text(&format!("have {have}\n"));
    }
    writer.write_text("done\n");

    Ok((writer.into_bytes(), sideband))
}

/// Extracts raw packfile bytes from an upload-pack reply.
///
/// Negotiation lines (`NAK`, `ACK`, `shallow`, `unshallow`) are skipped.
/// With side-band, channel 1 carries pack data, channel 2 progress
/// (forwarded to the log), channel 3 a fatal server error. Without
/// side-band the packfile arrives either pkt-framed or raw; raw capture
/// starts at the `PACK` signature.
pub(crate) fn demux_pack_response(body: &[u8], sideband: bool) -> Result<Vec<u8>> {
    let mut reader = PktLineReader::new(body);
    let mut pack = Vec::new();
    let mut collecting = false;

    loop {
        if !collecting && reader.remainder().starts_with(b"PACK") {
            pack.extend_from_slice(reader.remainder());
            break;
        }
        let payload = match reader.next_line()? {
            None => break,
            Some(PktLine::Flush) => continue,
            Some(PktLine::Data(p)) => p,
        };
        if payload.is_empty() {
            continue;
        }
        if let Some(msg) = payload.strip_prefix(b"ERR ") {
            return Err(GitError::protocol(format!(
                "server error: {}",
                String::from_utf8_lossy(msg).trim_end()
            )));
        }
        if is_negotiation_line(payload) {
            log::trace!("upload-pack: {}", String::from_utf8_lossy(payload).trim_end());
            continue;
        }

        if sideband {
            match payload[0] {
                1 => {
                    pack.extend_from_slice(&payload[1..]);
                    collecting = true;
                }
                2 => {
                    log::debug!("remote: {}", String::from_utf8_lossy(&payload[1..]).trim_end());
                }
                3 => {
                    return Err(GitError::protocol(format!(
                        "remote error: {}",
                        String::from_utf8_lossy(&payload[1..]).trim_end()
                    )));
                }
                other => {
                    return Err(GitError::protocol(format!("unknown side-band channel {other}")));
                }
            }
        } else if collecting || payload.starts_with(b"PACK") {
            collecting = true;
            pack.extend_from_slice(payload);
        } else {
            log::trace!("ignoring upload-pack line: {}", String::from_utf8_lossy(payload).trim_end());
        }
    }

    if pack.is_empty() {
        return Err(GitError::protocol("upload-pack reply carried no packfile"));
    }
    Ok(pack)
}

fn is_negotiation_line(payload: &[u8]) -> bool {
    payload.starts_with(b"NAK")
        || payload.starts_with(b"ACK")
        || payload.starts_with(b"shallow")
        || payload.starts_with(b"unshallow")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::connection::pkt_line::PktLineWriter;

    const COMMIT: &str = "14eb05f5beac67cdf2a229394baa626338a3d92e";
    const TAG: &str = "8ba2247ab0a7fca6750be46db85f80344ae0df44";

    fn sample_advertisement() -> Vec<u8> {
        let mut writer = PktLineWriter::new();
        writer.write_text("# service=git-upload-pack\n");
        writer.flush();
        writer.write_text(&format!(
            "{COMMIT} HEAD\0multi_ack_detailed side-band-64k ofs-delta shallow deepen-since \
             filter no-progress symref=HEAD:refs/heads/main agent=git/2.43.0\n"
        ));
        writer.write_text(&format!("{COMMIT} refs/heads/main\n"));
        writer.write_text(&format!("{TAG} refs/tags/v1.0\n"));
        writer.write_text(&format!("{COMMIT} refs/tags/v1.0^{{}}\n"));
        writer.flush();
        writer.into_bytes().to_vec()
    }

    #[test]
    fn test_parse_advertisement() {
        let advert = RefAdvertisement::parse(&sample_advertisement()).unwrap();

        assert_eq!(advert.refs.len(), 3);
        assert_eq!(advert.refs["HEAD"].to_hex(), COMMIT);
        assert_eq!(advert.refs["refs/heads/main"].to_hex(), COMMIT);
        assert_eq!(advert.refs["refs/tags/v1.0"].to_hex(), TAG);
        assert_eq!(advert.peeled_target("refs/tags/v1.0").unwrap().to_hex(), COMMIT);
        assert_eq!(advert.symref_target("HEAD"), Some("refs/heads/main"));
        assert!(advert.supports("side-band-64k"));
        assert!(!advert.supports("multi_ack"));
    }

    #[test]
    fn test_parse_empty_repository_advertisement() {
        let mut writer = PktLineWriter::new();
        writer.write_text("# service=git-upload-pack\n");
        writer.flush();
        writer.write_text(&format!(
            "{ZERO_ID} capabilities^{{}}\0multi_ack_detailed side-band-64k\n"
        ));
        writer.flush();

        let advert = RefAdvertisement::parse(&writer.into_bytes()).unwrap();
        assert!(advert.refs.is_empty());
        assert!(advert.supports("side-band-64k"));
        assert!(advert.resolve("main").is_none());
    }

    #[test]
    fn test_resolve_names_and_identifiers() {
        let advert = RefAdvertisement::parse(&sample_advertisement()).unwrap();

        assert_eq!(advert.resolve(COMMIT).unwrap().to_hex(), COMMIT);
        assert_eq!(advert.resolve("refs/heads/main").unwrap().to_hex(), COMMIT);
        assert_eq!(advert.resolve("main").unwrap().to_hex(), COMMIT);
        assert_eq!(advert.resolve("v1.0").unwrap().to_hex(), TAG);
        assert_eq!(advert.resolve("HEAD").unwrap().to_hex(), COMMIT);
        assert!(advert.resolve("does-not-exist").is_none());
    }

    #[test]
    fn test_build_request_lines() {
        let advert = RefAdvertisement::parse(&sample_advertisement()).unwrap();
        let want = ObjectId::from_hex(COMMIT).unwrap();
        let have = ObjectId::from_hex(TAG).unwrap();

        let request = FetchRequest::new(vec![want])
            .with_depth(1)
            .blobless()
            .with_haves(vec![have]);
        let (body, sideband) = build_upload_pack_request(&request, &advert).unwrap();
        assert!(sideband);

        let text = String::from_utf8_lossy(&body);
        assert!(text.contains(&format!(
            "want {COMMIT} multi_ack_detailed side-band-64k ofs-delta no-progress shallow deepen-since filter\n"
        )));
        assert!(text.contains("deepen 1\n"));
        assert!(text.contains("filter blob:none\n"));
        assert!(text.contains(&format!("0032have {TAG}\n")));
        assert!(text.ends_with("0009done\n"));
    }

    #[test]
    fn test_build_request_rejects_unsupported_filter() {
        let mut writer = PktLineWriter::new();
        writer.write_text(&format!("{COMMIT} refs/heads/main\0side-band-64k\n"));
        writer.flush();
        let advert = RefAdvertisement::parse(&writer.into_bytes()).unwrap();

        let request = FetchRequest::new(vec![ObjectId::from_hex(COMMIT).unwrap()]).blobless();
        assert!(matches!(
            build_upload_pack_request(&request, &advert),
            Err(GitError::Protocol(_))
        ));
    }

    #[test]
    fn test_demux_sideband_channels() {
        let mut writer = PktLineWriter::new();
        writer.write_text("NAK\n");
        writer.write(b"\x01PACKdata");
        writer.write(b"\x02Counting objects: done\n");
        writer.write(b"\x01more");
        writer.flush();

        let pack = demux_pack_response(&writer.into_bytes(), true).unwrap();
        assert_eq!(pack, b"PACKdatamore");
    }

    #[test]
    fn test_demux_sideband_error_channel() {
        let mut writer = PktLineWriter::new();
        writer.write(b"\x03access denied\n");
        let err = demux_pack_response(&writer.into_bytes(), true).unwrap_err();
        assert!(matches!(err, GitError::Protocol(msg) if msg.contains("access denied")));
    }

    #[test]
    fn test_demux_raw_pack_after_nak() {
        let mut writer = PktLineWriter::new();
        writer.write_text("NAK\n");
        let mut body = writer.into_bytes().to_vec();
        body.extend_from_slice(b"PACKrawbytes");

        let pack = demux_pack_response(&body, false).unwrap();
        assert_eq!(pack, b"PACKrawbytes");
    }

    #[test]
    fn test_demux_pkt_framed_pack() {
        let mut writer = PktLineWriter::new();
        writer.write_text("shallow 14eb05f5beac67cdf2a229394baa626338a3d92e\n");
        writer.write_text("NAK\n");
        writer.write(b"PACKfr");
        writer.write(b"amed");
        let pack = demux_pack_response(&writer.into_bytes(), false).unwrap();
        assert_eq!(pack, b"PACKframed");
    }

    #[test]
    fn test_demux_surfaces_err_line() {
        let mut writer = PktLineWriter::new();
        writer.write_text("ERR repository not exported\n");
        let err = demux_pack_response(&writer.into_bytes(), false).unwrap_err();
        assert!(matches!(err, GitError::Protocol(msg) if msg.contains("not exported")));
    }
}
