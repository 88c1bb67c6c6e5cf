use bson::{Bson, Document};

/// Resolves a dotted field path through nested documents.
///
/// Returns `None` when any segment is missing or a non-document value is
/// traversed.
pub fn lookup<'d>(doc: &'d Document, path: &str) -> Option<&'d Bson> {
    let mut segments = path.split('.');
    let mut current = doc.get(segments.next()?)?;
    for seg in segments {
        match current {
            Bson::Document(inner) => current = inner.get(seg)?,
            _ => return None,
        }
    }
    Some(current)
}

/// Like [`lookup`], treating a missing path as `Null`. Index maintenance uses
/// this so every record has exactly one entry per index.
pub fn lookup_or_null(doc: &Document, path: &str) -> Bson {
    lookup(doc, path).cloned().unwrap_or(Bson::Null)
}

#[cfg(test)]
mod tests {
    use super::*;
    use bson::doc;

    #[test]
    fn top_level_and_nested() {
        let d = doc! { "Name": "car", "Spec": { "Wheels": 4, "Engine": { "Hp": 90 } } };
        assert_eq!(lookup(&d, "Name"), Some(&Bson::String("car".into())));
        assert_eq!(lookup(&d, "Spec.Wheels"), Some(&Bson::Int32(4)));
        assert_eq!(lookup(&d, "Spec.Engine.Hp"), Some(&Bson::Int32(90)));
    }

    #[test]
    fn missing_segments() {
        let d = doc! { "Name": "car" };
        assert!(lookup(&d, "Color").is_none());
        assert!(lookup(&d, "Name.Inner").is_none());
        assert_eq!(lookup_or_null(&d, "Color"), Bson::Null);
    }
}
