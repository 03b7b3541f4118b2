use crate::errors::{GitError, Result};
use crate::objects::ObjectId;
use chrono::{DateTime, FixedOffset};

/// A commit participant: display name, email, and the instant the action
/// happened, carried with its original timezone offset.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Signature {
    pub name: String,
    pub email: String,
    pub when: DateTime<FixedOffset>,
}

/// A parsed commit object.
///
/// Records the root tree, the parents in order of appearance, both
/// participants, and the raw message bytes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Commit {
    pub tree: ObjectId,
    pub parents: Vec<ObjectId>,
    pub author: Signature,
    pub committer: Signature,
    pub message: Vec<u8>,
}

impl Commit {
    /// Parses a commit payload: header lines up to a blank line, then the
    /// message. Recognises `tree`, `parent`, `author`, and `committer`;
    /// other headers are skipped. Missing `tree` or either participant is
    /// a fatal error.
    pub fn parse(data: &[u8]) -> Result<Self> {
        let (header, message) = split_at_blank_line(data);
        let header = std::str::from_utf8(header)
            .map_err(|_| GitError::bad_format("commit header is not valid UTF-8"))?;

        let mut tree = None;
        let mut parents = Vec::new();
        let mut author = None;
        let mut committer = None;

        for line in header.lines() {
            // Continuation lines of multi-line headers such as gpgsig.
            if line.starts_with(' ') {
                continue;
            }
            let (key, value) = line
                .split_once(' ')
                .ok_or_else(|| GitError::bad_format(format!("malformed commit header line: {line:?}")))?;
            match key {
                "tree" => tree = Some(ObjectId::from_hex(value)?),
                "parent" => parents.push(ObjectId::from_hex(value)?),
                "author" => author = Some(parse_signature(value)?),
                "committer" => committer = Some(parse_signature(value)?),
                _ => {}
            }
        }

        Ok(Commit {
            tree: tree.ok_or_else(|| GitError::bad_format("commit is missing a tree header"))?,
            parents,
            author: author.ok_or_else(|| GitError::bad_format("commit is missing an author"))?,
            committer: committer
                .ok_or_else(|| GitError::bad_format("commit is missing a committer"))?,
            message,
        })
    }

    /// The message decoded as UTF-8, with invalid sequences replaced.
    pub fn message_text(&self) -> String {
        String::from_utf8_lossy(&self.message).into_owned()
    }
}

fn split_at_blank_line(data: &[u8]) -> (&[u8], Vec<u8>) {
    match data.windows(2).position(|w| w == b"\n\n") {
        Some(pos) => (&data[..pos], data[pos + 2..].to_vec()),
        None => (data, Vec::new()),
    }
}

/// Parses `Name <email> <unix-seconds> <±HHMM>`.
pub(crate) fn parse_signature(value: &str) -> Result<Signature> {
    let mut fields = value.rsplitn(3, ' ');
    let zone = fields
        .next()
        .ok_or_else(|| GitError::bad_format("signature is missing a timezone"))?;
    let seconds = fields
        .next()
        .ok_or_else(|| GitError::bad_format("signature is missing a timestamp"))?;
    let identity = fields
        .next()
        .ok_or_else(|| GitError::bad_format("signature is missing a name"))?;

    let open = identity
        .rfind('<')
        .ok_or_else(|| GitError::bad_format(format!("signature has no email: {identity:?}")))?;
    let close = identity
        .rfind('>')
        .filter(|&close| close > open)
        .ok_or_else(|| GitError::bad_format(format!("unterminated email in signature: {identity:?}")))?;
    let name = identity[..open].trim_end().to_string();
    let email = identity[open + 1..close].to_string();

    let seconds: i64 = seconds
        .parse()
        .map_err(|_| GitError::bad_format(format!("invalid signature timestamp: {seconds:?}")))?;
    let offset = parse_timezone(zone)?;
    let when = DateTime::from_timestamp(seconds, 0)
        .ok_or_else(|| GitError::bad_format(format!("signature timestamp out of range: {seconds}")))?
        .with_timezone(&offset);

    Ok(Signature { name, email, when })
}

fn parse_timezone(zone: &str) -> Result<FixedOffset> {
    let bytes = zone.as_bytes();
    if bytes.len() != 5 || !matches!(bytes[0], b'+' | b'-') {
        return Err(GitError::bad_format(format!("invalid timezone offset: {zone:?}")));
    }
    let hours: i32 = zone[1..3]
        .parse()
        .map_err(|_| GitError::bad_format(format!("invalid timezone offset: {zone:?}")))?;
    let minutes: i32 = zone[3..5]
        .parse()
        .map_err(|_| GitError::bad_format(format!("invalid timezone offset: {zone:?}")))?;
    let mut seconds = hours * 3600 + minutes * 60;
    if bytes[0] == b'-' {
        seconds = -seconds;
    }
    FixedOffset::east_opt(seconds)
        .ok_or_else(|| GitError::bad_format(format!("timezone offset out of range: {zone:?}")))
}
