//! CBOR encoding of diffs and the persisted row layout.
//!
//! A commit is stored as one row per parent edge (a root has a single row
//! without a parent). Snapshots are stored as one row per commit. Storage
//! backends are free to map these rows onto tables or files.

use crate::commit::{Commit, CommitId};
use crate::error::{OtError, OtResult};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Encodes a value as CBOR.
pub fn encode<T: Serialize + ?Sized>(value: &T) -> OtResult<Vec<u8>> {
    let mut bytes = Vec::new();
    ciborium::into_writer(value, &mut bytes).map_err(|e| OtError::Codec(e.to_string()))?;
    Ok(bytes)
}

/// Decodes a CBOR value.
pub fn decode<T: DeserializeOwned>(bytes: &[u8]) -> OtResult<T> {
    ciborium::from_reader(bytes).map_err(|e| OtError::Codec(e.to_string()))
}

/// Encodes a diff list.
pub fn encode_diffs<D: Serialize>(diffs: &[D]) -> OtResult<Vec<u8>> {
    encode(diffs)
}

/// Decodes a diff list.
pub fn decode_diffs<D: DeserializeOwned>(bytes: &[u8]) -> OtResult<Vec<D>> {
    decode(bytes)
}

/// One parent edge of a stored commit.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CommitRow<K> {
    /// The commit.
    pub id: K,
    /// The parent, or `None` for a root.
    pub parent_id: Option<K>,
    /// Level of the commit.
    pub level: u64,
    /// Encoded diffs from the parent to the commit.
    pub diff_bytes: Vec<u8>,
}

/// A stored snapshot.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SnapshotRow<K> {
    /// The commit the snapshot describes.
    pub commit_id: K,
    /// Encoded diffs from the root to the commit.
    pub diff_bytes: Vec<u8>,
}

impl<K: CommitId> SnapshotRow<K> {
    /// Encodes a snapshot.
    pub fn encode<D: Serialize>(commit_id: K, diffs: &[D]) -> OtResult<Self> {
        Ok(Self {
            commit_id,
            diff_bytes: encode_diffs(diffs)?,
        })
    }

    /// Decodes the snapshot diffs.
    pub fn decode<D: DeserializeOwned>(&self) -> OtResult<Vec<D>> {
        decode_diffs(&self.diff_bytes)
    }
}

impl<K: CommitId, D: Serialize + DeserializeOwned> Commit<K, D> {
    /// Splits the commit into one row per parent edge.
    pub fn to_rows(&self) -> OtResult<Vec<CommitRow<K>>> {
        if self.is_root() {
            return Ok(vec![CommitRow {
                id: self.id().clone(),
                parent_id: None,
                level: self.level(),
                diff_bytes: encode_diffs::<D>(&[])?,
            }]);
        }
        self.parents()
            .iter()
            .map(|(parent, diffs)| {
                Ok(CommitRow {
                    id: self.id().clone(),
                    parent_id: Some(parent.clone()),
                    level: self.level(),
                    diff_bytes: encode_diffs(diffs)?,
                })
            })
            .collect()
    }

    /// Reassembles a commit from its rows.
    pub fn from_rows(rows: &[CommitRow<K>]) -> OtResult<Self> {
        let first = rows
            .first()
            .ok_or_else(|| OtError::Codec("commit has no rows".into()))?;

        let mut parents = BTreeMap::new();
        for row in rows {
            if row.id != first.id || row.level != first.level {
                return Err(OtError::Codec(format!(
                    "inconsistent rows for commit {:?}",
                    first.id
                )));
            }
            if let Some(parent) = &row.parent_id {
                parents.insert(parent.clone(), decode_diffs(&row.diff_bytes)?);
            }
        }
        Ok(Commit::new(first.id.clone(), parents, first.level))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn diffs_roundtrip() {
        let diffs = vec!["a".to_string(), "bc".to_string()];
        let bytes = encode_diffs(&diffs).unwrap();
        let decoded: Vec<String> = decode_diffs(&bytes).unwrap();
        assert_eq!(decoded, diffs);
    }

    #[test]
    fn corrupt_bytes_are_codec_errors() {
        let result: OtResult<Vec<String>> = decode_diffs(&[0xff, 0x00, 0x13]);
        assert!(matches!(result, Err(OtError::Codec(_))));
    }

    #[test]
    fn root_is_a_single_row() {
        let root: Commit<u64, i64> = Commit::root(1);
        let rows = root.to_rows().unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].parent_id, None);

        let restored = Commit::<u64, i64>::from_rows(&rows).unwrap();
        assert_eq!(restored, root);
    }

    #[test]
    fn merge_commit_has_a_row_per_parent() {
        let mut parents = BTreeMap::new();
        parents.insert(2u64, vec![1i64, 2]);
        parents.insert(3u64, vec![3i64]);
        let merge = Commit::new(4u64, parents, 2);

        let rows = merge.to_rows().unwrap();
        assert_eq!(rows.len(), 2);
        assert!(rows.iter().all(|row| row.id == 4 && row.level == 2));

        let restored = Commit::<u64, i64>::from_rows(&rows).unwrap();
        assert_eq!(restored, merge);
    }

    #[test]
    fn inconsistent_rows_are_rejected() {
        let rows = vec![
            CommitRow {
                id: 5u64,
                parent_id: Some(1),
                level: 1,
                diff_bytes: encode_diffs::<i64>(&[]).unwrap(),
            },
            CommitRow {
                id: 6u64,
                parent_id: Some(2),
                level: 1,
                diff_bytes: encode_diffs::<i64>(&[]).unwrap(),
            },
        ];
        assert!(Commit::<u64, i64>::from_rows(&rows).is_err());
        assert!(Commit::<u64, i64>::from_rows(&[]).is_err());
    }

    #[test]
    fn snapshot_row_roundtrip() {
        let row = SnapshotRow::encode(9u64, &[4i64, 5]).unwrap();
        let diffs: Vec<i64> = row.decode().unwrap();
        assert_eq!(diffs, vec![4, 5]);
    }
}
