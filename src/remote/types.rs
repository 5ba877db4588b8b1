//! Wire types for the listing and removal endpoints.

use serde::{Deserialize, Serialize};

/// One entry of a directory listing page, as sent by the server.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
pub struct RemoteEntry {
    /// Final path segment.
    pub name: String,
    /// Full path; some servers omit it and only send `name`.
    #[serde(default)]
    pub path: Option<String>,
    /// Size in bytes (0 for directories).
    #[serde(default)]
    pub size: u64,
    /// Content fingerprint, also used to sign download URLs.
    #[serde(default, alias = "sign")]
    pub signature: String,
    /// Whether the entry is a sub-directory.
    #[serde(rename = "isDirectory", alias = "is_dir", default)]
    pub is_directory: bool,
}

/// One page of a directory listing.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize, Serialize)]
pub struct ListPage {
    /// Entries on this page.
    pub entries: Vec<RemoteEntry>,
    /// Whether another page follows.
    #[serde(rename = "hasMore", default)]
    pub has_more: bool,
}

/// Body of `POST /api/fs/remove`.
#[derive(Debug, Clone, Serialize)]
pub struct RemoveRequest<'a> {
    /// Parent directory of the removed entries.
    pub dir: &'a str,
    /// Entry names inside `dir`.
    pub names: Vec<&'a str>,
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn test_list_page_deserializes_camel_case() {
        let json = r#"{
            "entries": [
                {"name": "f1.txt", "path": "/a/f1.txt", "size": 100, "signature": "s1", "isDirectory": false},
                {"name": "b", "isDirectory": true}
            ],
            "hasMore": true
        }"#;
        let page: ListPage = serde_json::from_str(json).unwrap();
        assert!(page.has_more);
        assert_eq!(page.entries.len(), 2);
        assert_eq!(page.entries[0].path.as_deref(), Some("/a/f1.txt"));
        assert_eq!(page.entries[0].size, 100);
        assert!(page.entries[1].is_directory);
        assert_eq!(page.entries[1].path, None);
        assert_eq!(page.entries[1].signature, "");
    }

    #[test]
    fn test_list_page_missing_has_more_defaults_false() {
        let page: ListPage = serde_json::from_str(r#"{"entries": []}"#).unwrap();
        assert!(!page.has_more);
    }

    #[test]
    fn test_list_page_rejects_missing_entries() {
        assert!(serde_json::from_str::<ListPage>(r#"{"hasMore": false}"#).is_err());
    }

    #[test]
    fn test_remove_request_serializes() {
        let body = RemoveRequest {
            dir: "/a",
            names: vec!["f1.txt"],
        };
        let json = serde_json::to_value(&body).unwrap();
        assert_eq!(json["dir"], "/a");
        assert_eq!(json["names"][0], "f1.txt");
    }
}
