//! In-memory group/entry tree and its mapping to the flat record
//! stream.
//!
//! On disk, groups are a flat list annotated with a `level` (tree
//! depth) and entries carry a group-id foreign key.  In memory, a
//! synthetic root group (conceptual level -1) owns the top-level
//! groups; each group owns its child groups and entries in order.
//!
//! The invariant for rebuilding: every non-root group's parent is the
//! nearest preceding group whose level is one less.  A level gap
//! greater than one is malformed input.  Entries whose group id does
//! not resolve attach to the root and are reported as orphans, not
//! errors.

use std::iter::Peekable;

use chrono::NaiveDateTime;

use crate::errors::{KdbError, Result};
use crate::format::record::{EntryRecord, GroupRecord};

/// A group node.  The root group is synthetic: id 0, empty title, not
/// serialized.
#[derive(Debug, Default, Clone, PartialEq)]
pub struct Group {
    pub id: u32,
    pub title: String,
    pub icon: u32,
    pub flags: u32,
    pub created: Option<NaiveDateTime>,
    pub modified: Option<NaiveDateTime>,
    pub accessed: Option<NaiveDateTime>,
    pub expires: Option<NaiveDateTime>,
    pub children: Vec<Group>,
    pub entries: Vec<Entry>,
}

impl Group {
    pub fn new(id: u32, title: &str) -> Self {
        Group {
            id,
            title: title.to_string(),
            icon: 1,
            ..Default::default()
        }
    }

    /// The synthetic per-database root.
    pub(crate) fn root() -> Self {
        Group::default()
    }

    /// Convert a decoded flat record, returning the node and its level.
    pub(crate) fn from_record(rec: GroupRecord) -> Result<(u16, Self)> {
        let id = rec
            .id
            .ok_or_else(|| KdbError::Structural("group record is missing an id".into()))?;
        if id == 0 || id == 0xFFFF_FFFF {
            return Err(KdbError::Structural(format!("invalid group id {id:#010x}")));
        }
        let level = rec
            .level
            .ok_or_else(|| KdbError::Structural("group record is missing a level".into()))?;

        let group = Group {
            id,
            title: rec.title.unwrap_or_default(),
            icon: rec.icon.unwrap_or_default(),
            flags: rec.flags.unwrap_or_default(),
            created: rec.created,
            modified: rec.modified,
            accessed: rec.accessed,
            expires: rec.expires,
            children: Vec::new(),
            entries: Vec::new(),
        };
        Ok((level, group))
    }

    pub(crate) fn to_record(&self, level: u16) -> GroupRecord {
        GroupRecord {
            id: Some(self.id),
            title: Some(self.title.clone()),
            created: self.created,
            modified: self.modified,
            accessed: self.accessed,
            expires: self.expires,
            icon: Some(self.icon),
            level: Some(level),
            flags: Some(self.flags),
        }
    }
}

/// A password entry.  `uuid` holds the lowercase hex text the record
/// codec produced; `group_id` is the on-disk foreign key, kept so
/// orphaned entries survive a save unchanged.
#[derive(Debug, Default, Clone, PartialEq)]
pub struct Entry {
    pub uuid: String,
    pub group_id: u32,
    pub icon: u32,
    pub title: String,
    pub url: String,
    pub username: String,
    pub password: String,
    pub notes: String,
    pub created: Option<NaiveDateTime>,
    pub modified: Option<NaiveDateTime>,
    pub accessed: Option<NaiveDateTime>,
    pub expires: Option<NaiveDateTime>,
    pub binary_desc: String,
    pub binary: Option<Vec<u8>>,
}

impl Entry {
    pub(crate) fn from_record(rec: EntryRecord) -> Self {
        Entry {
            uuid: rec.uuid.unwrap_or_default(),
            group_id: rec.group_id.unwrap_or_default(),
            icon: rec.icon.unwrap_or_default(),
            title: rec.title.unwrap_or_default(),
            url: rec.url.unwrap_or_default(),
            username: rec.username.unwrap_or_default(),
            password: rec.password.unwrap_or_default(),
            notes: rec.notes.unwrap_or_default(),
            created: rec.created,
            modified: rec.modified,
            accessed: rec.accessed,
            expires: rec.expires,
            binary_desc: rec.binary_desc.unwrap_or_default(),
            binary: rec.binary,
        }
    }

    pub(crate) fn to_record(&self, group_id: u32) -> EntryRecord {
        EntryRecord {
            uuid: Some(self.uuid.clone()),
            group_id: Some(group_id),
            icon: Some(self.icon),
            title: Some(self.title.clone()),
            url: Some(self.url.clone()),
            username: Some(self.username.clone()),
            password: Some(self.password.clone()),
            notes: Some(self.notes.clone()),
            created: self.created,
            modified: self.modified,
            accessed: self.accessed,
            expires: self.expires,
            binary_desc: Some(self.binary_desc.clone()),
            binary: self.binary.clone(),
        }
    }
}

/// Rebuild the hierarchy from the flat, level-annotated group stream
/// and attach entries by group reference.
///
/// Returns the root group and the uuids of entries whose group id did
/// not resolve (attached to the root).
pub(crate) fn build_tree(
    mut groups: Vec<(u16, Group)>,
    entries: Vec<Entry>,
) -> Result<(Group, Vec<String>)> {
    let mut root = Group::root();
    let mut orphaned = Vec::new();

    // Attach each entry to the most recently seen group with its id.
    for entry in entries {
        match groups.iter_mut().rev().find(|(_, g)| g.id == entry.group_id) {
            Some((_, group)) => group.entries.push(entry),
            None => {
                orphaned.push(entry.uuid.clone());
                root.entries.push(entry);
            }
        }
    }

    let mut iter = groups.into_iter().peekable();
    root.children = take_children(&mut iter, 0)?;
    Ok((root, orphaned))
}

/// Consume consecutive groups at `level`, recursing when the next
/// group sits exactly one level deeper.  The stream is pre-order, so a
/// group at a shallower level belongs to an ancestor and ends this
/// run; a jump of more than one level is malformed.
fn take_children<I>(iter: &mut Peekable<I>, level: u16) -> Result<Vec<Group>>
where
    I: Iterator<Item = (u16, Group)>,
{
    let mut out: Vec<Group> = Vec::new();
    while let Some(next_level) = iter.peek().map(|&(l, _)| l) {
        if next_level < level {
            break;
        }
        if next_level > level {
            return Err(KdbError::Structural(format!(
                "group at level {next_level} has no parent at level {}",
                next_level as i32 - 1
            )));
        }
        let (_, mut group) = iter.next().expect("peeked");
        if iter.peek().map(|&(l, _)| l) == Some(level + 1) {
            group.children = take_children(iter, level + 1)?;
        }
        out.push(group);
    }
    Ok(out)
}

/// Flatten the tree back to the on-disk order: groups in pre-order
/// with level = depth, then entries in the same per-group traversal
/// order.  Root-attached entries are re-emitted last with their
/// original dangling group reference.
pub(crate) fn flatten(root: &Group) -> (Vec<GroupRecord>, Vec<EntryRecord>) {
    let mut group_records = Vec::new();
    let mut entry_records = Vec::new();
    walk(root, 0, &mut group_records, &mut entry_records);
    for entry in &root.entries {
        entry_records.push(entry.to_record(entry.group_id));
    }
    (group_records, entry_records)
}

fn walk(
    group: &Group,
    depth: u16,
    group_records: &mut Vec<GroupRecord>,
    entry_records: &mut Vec<EntryRecord>,
) {
    for child in &group.children {
        group_records.push(child.to_record(depth));
        for entry in &child.entries {
            entry_records.push(entry.to_record(child.id));
        }
        walk(child, depth + 1, group_records, entry_records);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn g(id: u32, title: &str) -> Group {
        Group::new(id, title)
    }

    fn e(uuid: &str, group_id: u32, title: &str) -> Entry {
        Entry {
            uuid: uuid.to_string(),
            group_id,
            title: title.to_string(),
            ..Default::default()
        }
    }

    #[test]
    fn levels_rebuild_the_documented_forest() {
        // Levels [0, 1, 1, 2, 0]: two top-level groups; the level-2
        // group is a grandchild of the first.
        let groups = vec![
            (0, g(1, "A")),
            (1, g(2, "B")),
            (1, g(3, "C")),
            (2, g(4, "D")),
            (0, g(5, "E")),
        ];
        let (root, orphaned) = build_tree(groups, vec![]).unwrap();
        assert!(orphaned.is_empty());

        assert_eq!(root.children.len(), 2);
        let a = &root.children[0];
        assert_eq!(a.title, "A");
        assert_eq!(
            a.children.iter().map(|c| c.title.as_str()).collect::<Vec<_>>(),
            vec!["B", "C"]
        );
        assert_eq!(a.children[1].children[0].title, "D");
        assert_eq!(root.children[1].title, "E");
    }

    #[test]
    fn level_gap_is_malformed() {
        let groups = vec![(0, g(1, "A")), (2, g(2, "B"))];
        let err = build_tree(groups, vec![]).unwrap_err();
        // The missing link is the parent one level up, whatever level
        // the preceding sibling sat at.
        assert!(matches!(&err, KdbError::Structural(_)));
        assert!(err.to_string().contains("level 2 has no parent at level 1"));
    }

    #[test]
    fn first_group_must_be_top_level() {
        let groups = vec![(1, g(1, "A"))];
        assert!(build_tree(groups, vec![]).is_err());
    }

    #[test]
    fn entries_attach_to_most_recently_seen_matching_group() {
        // Two groups share id 9; the entry lands on the later one.
        let groups = vec![(0, g(9, "first")), (0, g(9, "second"))];
        let entries = vec![e("aa", 9, "E1")];
        let (root, orphaned) = build_tree(groups, entries).unwrap();
        assert!(orphaned.is_empty());
        assert!(root.children[0].entries.is_empty());
        assert_eq!(root.children[1].entries[0].title, "E1");
    }

    #[test]
    fn unresolved_entry_goes_to_root_as_orphan() {
        let groups = vec![(0, g(1, "A"))];
        let entries = vec![e("dead", 99, "lost")];
        let (root, orphaned) = build_tree(groups, entries).unwrap();
        assert_eq!(orphaned, vec!["dead".to_string()]);
        assert_eq!(root.entries.len(), 1);
        assert!(root.children[0].entries.is_empty());
    }

    #[test]
    fn flatten_assigns_level_from_depth() {
        let mut a = g(1, "A");
        let mut c = g(3, "C");
        c.children.push(g(4, "D"));
        a.children.push(g(2, "B"));
        a.children.push(c);
        let mut root = Group::root();
        root.children.push(a);
        root.children.push(g(5, "E"));

        let (group_records, _) = flatten(&root);
        let levels: Vec<u16> = group_records.iter().map(|r| r.level.unwrap()).collect();
        assert_eq!(levels, vec![0, 1, 1, 2, 0]);
        let ids: Vec<u32> = group_records.iter().map(|r| r.id.unwrap()).collect();
        assert_eq!(ids, vec![1, 2, 3, 4, 5]);
    }

    #[test]
    fn flatten_emits_entries_in_traversal_order_with_owner_ids() {
        let mut a = g(1, "A");
        a.entries.push(e("01", 0, "A1"));
        let mut b = g(2, "B");
        b.entries.push(e("02", 0, "B1"));
        a.children.push(b);
        let mut root = Group::root();
        root.children.push(a);

        let (_, entry_records) = flatten(&root);
        let owners: Vec<u32> = entry_records.iter().map(|r| r.group_id.unwrap()).collect();
        // Owner ids come from the tree position, not the stale fk.
        assert_eq!(owners, vec![1, 2]);
    }

    #[test]
    fn flatten_rebuild_roundtrip() {
        let groups = vec![
            (0, g(1, "A")),
            (1, g(2, "B")),
            (2, g(3, "C")),
            (0, g(4, "D")),
        ];
        let (root, _) = build_tree(groups, vec![]).unwrap();
        let (records, _) = flatten(&root);
        let again: Result<Vec<_>> = records.into_iter().map(Group::from_record).collect();
        let (root2, _) = build_tree(again.unwrap(), vec![]).unwrap();
        assert_eq!(root, root2);
    }

    #[test]
    fn record_missing_id_or_bad_id_is_malformed() {
        let rec = GroupRecord {
            level: Some(0),
            ..Default::default()
        };
        assert!(Group::from_record(rec).is_err());

        let rec = GroupRecord {
            id: Some(0xFFFF_FFFF),
            level: Some(0),
            ..Default::default()
        };
        assert!(Group::from_record(rec).is_err());
    }
}
