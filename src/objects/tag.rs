use crate::errors::{GitError, Result};
use crate::objects::commit::{parse_signature, Signature};
use crate::objects::{ObjectId, ObjectKind};

/// An annotated tag object.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Tag {
    /// The object this tag points at.
    pub object: ObjectId,
    /// The kind of the target object.
    pub target_kind: ObjectKind,
    pub name: String,
    pub tagger: Option<Signature>,
    pub message: Vec<u8>,
}

impl Tag {
    pub fn parse(data: &[u8]) -> Result<Self> {
        let header_end = data
            .windows(2)
            .position(|w| w == b"\n\n")
            .unwrap_or(data.len());
        let message = if header_end + 2 <= data.len() {
            data[header_end + 2..].to_vec()
        } else {
            Vec::new()
        };
        let header = std::str::from_utf8(&data[..header_end])
            .map_err(|_| GitError::bad_format("tag header is not valid UTF-8"))?;

        let mut object = None;
        let mut target_kind = None;
        let mut name = None;
        let mut tagger = None;

        for line in header.lines() {
            if line.starts_with(' ') {
                continue;
            }
            let (key, value) = line
                .split_once(' ')
                .ok_or_else(|| GitError::bad_format(format!("malformed tag header line: {line:?}")))?;
            match key {
                "object" => object = Some(ObjectId::from_hex(value)?),
                "type" => {
                    target_kind = Some(match value {
                        "commit" => ObjectKind::Commit,
                        "tree" => ObjectKind::Tree,
                        "blob" => ObjectKind::Blob,
                        "tag" => ObjectKind::Tag,
                        other => {
                            return Err(GitError::bad_format(format!("unknown tag target type: {other:?}")))
                        }
                    })
                }
                "tag" => name = Some(value.to_string()),
                "tagger" => tagger = Some(parse_signature(value)?),
                _ => {}
            }
        }

        Ok(Tag {
            object: object.ok_or_else(|| GitError::bad_format("tag is missing an object header"))?,
            target_kind: target_kind
                .ok_or_else(|| GitError::bad_format("tag is missing a type header"))?,
            name: name.ok_or_else(|| GitError::bad_format("tag is missing a tag header"))?,
            tagger,
            message,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_annotated_tag() {
        let payload = b"object 14eb05f5beac67cdf2a229394baa626338a3d92e\n\
                        type commit\n\
                        tag v1.0\n\
                        tagger Alice <a@example.com> 1761550977 +0000\n\
                        \n\
                        first release\n";
        let tag = Tag::parse(payload).unwrap();
        assert_eq!(tag.object.to_hex(), "14eb05f5beac67cdf2a229394baa626338a3d92e");
        assert_eq!(tag.target_kind, ObjectKind::Commit);
        assert_eq!(tag.name, "v1.0");
        assert_eq!(tag.tagger.unwrap().name, "Alice");
        assert_eq!(tag.message, b"first release\n");
    }

    #[test]
    fn test_tag_requires_object() {
        assert!(Tag::parse(b"type commit\ntag v1\n\nmsg\n").is_err());
    }
}
