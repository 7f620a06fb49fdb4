// SPDX-License-Identifier: MIT OR Apache-2.0

//! Contract tests run against every shipped backend.

use tap_core::{Bucket, ContentBlock, Node, Role, TokenUsage};
use tap_dag::{DagStore, MemoryStore, SqliteStore};

fn backends() -> Vec<(&'static str, Box<dyn DagStore>)> {
    vec![
        ("memory", Box::new(MemoryStore::new())),
        (
            "sqlite",
            Box::new(SqliteStore::open_in_memory().expect("open sqlite")),
        ),
    ]
}

fn user_node(text: &str, parent: Option<&Node>) -> Node {
    let bucket = Bucket::message(
        Role::User,
        vec![ContentBlock::text(text)],
        "test-model",
        "ollama",
        None,
    );
    Node::new(parent.map(|p| p.hash.clone()), bucket).unwrap()
}

fn assistant_node(text: &str, parent: Option<&Node>) -> Node {
    let bucket = Bucket::message(
        Role::Assistant,
        vec![ContentBlock::text(text)],
        "test-model",
        "ollama",
        None,
    );
    Node::new(parent.map(|p| p.hash.clone()), bucket).unwrap()
}

#[test]
fn duplicate_put_preserves_first_metadata() {
    for (name, store) in backends() {
        let first = user_node("hello", None).with_usage(Some(TokenUsage::counted(3, 0)));
        assert!(store.put(&first).unwrap(), "{name}: first put");

        let replay = user_node("hello", None).with_usage(Some(TokenUsage::counted(99, 99)));
        assert!(!store.put(&replay).unwrap(), "{name}: replay put");

        let stored = store.get(&first.hash).unwrap();
        assert_eq!(
            stored.usage,
            Some(TokenUsage::counted(3, 0)),
            "{name}: metadata overwritten"
        );
    }
}

#[test]
fn siblings_coexist_and_are_leaves() {
    for (name, store) in backends() {
        let parent = user_node("same prompt", None);
        let answer_a = assistant_node("first answer", Some(&parent));
        let answer_b = assistant_node("second answer", Some(&parent));
        for n in [&parent, &answer_a, &answer_b] {
            assert!(store.put(n).unwrap(), "{name}: put");
        }

        let kids = store.children_of(Some(&parent.hash)).unwrap();
        assert_eq!(kids.len(), 2, "{name}: children_of");

        let leaf_hashes: Vec<String> =
            store.leaves().unwrap().into_iter().map(|n| n.hash).collect();
        assert!(leaf_hashes.contains(&answer_a.hash), "{name}: leaf a");
        assert!(leaf_hashes.contains(&answer_b.hash), "{name}: leaf b");
        assert!(!leaf_hashes.contains(&parent.hash), "{name}: parent not leaf");
    }
}

#[test]
fn linear_chain_ancestry_and_depth() {
    for (name, store) in backends() {
        let a = user_node("a", None);
        let b = assistant_node("b", Some(&a));
        let c = user_node("c", Some(&b));
        for n in [&a, &b, &c] {
            store.put(n).unwrap();
        }

        let chain: Vec<String> = store
            .ancestry(&c.hash)
            .unwrap()
            .into_iter()
            .map(|n| n.hash)
            .collect();
        assert_eq!(
            chain,
            vec![c.hash.clone(), b.hash.clone(), a.hash.clone()],
            "{name}: ancestry order"
        );
        assert_eq!(store.depth(&c.hash).unwrap(), 2, "{name}: depth");
        assert_eq!(store.depth(&a.hash).unwrap(), 0, "{name}: root depth");
    }
}

#[test]
fn roots_are_parentless_children() {
    for (name, store) in backends() {
        let root_one = user_node("one", None);
        let root_two = user_node("two", None);
        let kid = assistant_node("kid", Some(&root_one));
        for n in [&root_one, &root_two, &kid] {
            store.put(n).unwrap();
        }

        let roots: Vec<String> = store.roots().unwrap().into_iter().map(|n| n.hash).collect();
        assert_eq!(roots.len(), 2, "{name}: root count");
        assert!(roots.contains(&root_one.hash), "{name}");
        assert!(roots.contains(&root_two.hash), "{name}");
    }
}

#[test]
fn list_is_stable_per_backend() {
    for (name, store) in backends() {
        let a = user_node("a", None);
        let b = assistant_node("b", Some(&a));
        store.put(&a).unwrap();
        store.put(&b).unwrap();
        let first: Vec<String> = store.list().unwrap().into_iter().map(|n| n.hash).collect();
        let second: Vec<String> = store.list().unwrap().into_iter().map(|n| n.hash).collect();
        assert_eq!(first, second, "{name}: unstable list order");
        assert_eq!(first.len(), 2, "{name}");
    }
}
