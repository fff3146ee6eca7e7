use thiserror::Error;

/// Error type used throughout the tileforge crates.
///
/// The actual failure is described by [`ErrorKind`]; it is boxed to keep
/// `Result<T>` the size of a pointer on the happy path.
#[derive(Debug, Error)]
#[error(transparent)]
pub struct Error(Box<ErrorKind>);

/// The OSM entity class an error refers to, used to build messages that
/// name the offending object.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum OsmEntity {
    Node,
    Way,
    Relation,
}

impl std::fmt::Display for OsmEntity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            OsmEntity::Node => f.write_str("node"),
            OsmEntity::Way => f.write_str("way"),
            OsmEntity::Relation => f.write_str("relation"),
        }
    }
}

impl Error {
    pub fn kind(&self) -> &ErrorKind {
        self.0.as_ref()
    }

    pub fn into_kind(self) -> ErrorKind {
        *self.0
    }

    /// An entity is absent from its store.
    pub fn missing_entity(entity: OsmEntity, id: u64) -> Error {
        Error(
            ErrorKind::MissingEntity {
                entity,
                id,
                referrer: None,
            }
            .into(),
        )
    }

    /// An entity referenced by another entity is absent from its store;
    /// the message names the referencing object.
    pub fn missing_reference(
        entity: OsmEntity,
        id: u64,
        referrer: OsmEntity,
        referrer_id: u64,
    ) -> Error {
        Error(
            ErrorKind::MissingEntity {
                entity,
                id,
                referrer: Some((referrer, referrer_id)),
            }
            .into(),
        )
    }

    pub fn malformed_pbf(message: impl Into<String>) -> Error {
        Error(
            ErrorKind::MalformedPbf {
                message: message.into(),
            }
            .into(),
        )
    }

    /// The 16-bit attribute key space overflowed. Unrecoverable.
    pub fn key_space_exhausted(key: impl Into<String>) -> Error {
        Error(ErrorKind::KeySpaceExhausted { key: key.into() }.into())
    }

    pub fn invalid_option(name: impl Into<String>, message: impl Into<String>) -> Error {
        Error(
            ErrorKind::InvalidOption {
                name: name.into(),
                message: message.into(),
            }
            .into(),
        )
    }

    pub fn script(entity: OsmEntity, id: u64, message: impl Into<String>) -> Error {
        Error(
            ErrorKind::Script {
                entity,
                id,
                message: message.into(),
            }
            .into(),
        )
    }

    pub fn geometry(context: impl Into<String>) -> Error {
        Error(
            ErrorKind::Geometry {
                context: context.into(),
            }
            .into(),
        )
    }

    pub fn io(context: impl Into<String>, source: std::io::Error) -> Error {
        Error(
            ErrorKind::Io {
                context: context.into(),
                source,
            }
            .into(),
        )
    }

    /// True when the error is a `MissingEntity`, which the stores may
    /// recover from locally when integrity enforcement is off.
    pub fn is_missing_entity(&self) -> bool {
        matches!(self.kind(), ErrorKind::MissingEntity { .. })
    }
}

#[derive(Debug, Error)]
pub enum ErrorKind {
    #[error("{entity} {id} is not present in its store{}", .referrer.map(|(e, i)| format!(" (referenced by {e} {i})")).unwrap_or_default())]
    MissingEntity {
        entity: OsmEntity,
        id: u64,
        referrer: Option<(OsmEntity, u64)>,
    },

    #[error("malformed pbf: {message}")]
    MalformedPbf { message: String },

    #[error("more than 65,535 unique attribute keys (while interning '{key}')")]
    KeySpaceExhausted { key: String },

    #[error("invalid option {name}: {message}")]
    InvalidOption { name: String, message: String },

    #[error("script error on {entity} {id}: {message}")]
    Script {
        entity: OsmEntity,
        id: u64,
        message: String,
    },

    #[error("geometry error: {context}")]
    Geometry { context: String },

    #[error("IO error for '{context}': {source}")]
    Io {
        context: String,
        source: std::io::Error,
    },
}

impl From<ErrorKind> for Error {
    fn from(kind: ErrorKind) -> Error {
        Error(Box::new(kind))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_messages_name_the_entity() {
        let e = Error::missing_entity(OsmEntity::Way, 123);
        assert_eq!(e.to_string(), "way 123 is not present in its store");
        assert!(e.is_missing_entity());

        let e = Error::script(OsmEntity::Relation, 9, "boom");
        assert_eq!(e.to_string(), "script error on relation 9: boom");
        assert!(!e.is_missing_entity());
    }
}
