use super::*;

fn trees() -> Vec<(&'static str, Box<dyn Tree>, tempfile::TempDir)> {
    let tmp = tempfile::tempdir().unwrap();
    let fs_tree = FsTree::new(tmp.path()).unwrap();
    let tmp2 = tempfile::tempdir().unwrap();
    vec![
        ("fs", Box::new(fs_tree), tmp),
        ("mem", Box::new(MemTree::new()), tmp2),
    ]
}

#[test]
fn probe_distinguishes_dirs_files_and_missing() {
    for (label, tree, _guard) in trees() {
        tree.write("/items/type", b"widget").unwrap();
        assert_eq!(tree.probe("/items").unwrap(), Node::Dir, "{label}");
        assert_eq!(tree.probe("/items/").unwrap(), Node::Dir, "{label}");
        assert_eq!(tree.probe("/items/type").unwrap(), Node::File, "{label}");
        assert_eq!(tree.probe("/items/type/").unwrap(), Node::Missing, "{label}");
        assert_eq!(tree.probe("/nothing").unwrap(), Node::Missing, "{label}");
        assert_eq!(tree.probe("/").unwrap(), Node::Dir, "{label}");
    }
}

#[test]
fn list_children_is_sorted_and_flags_directories() {
    for (label, tree, _guard) in trees() {
        tree.create_dir("/items/6").unwrap();
        tree.create_dir("/items/5").unwrap();
        tree.write("/items/type", b"widget").unwrap();
        tree.write("/items/5/data.json", b"{}").unwrap();
        let kids = tree.list_children("/items/").unwrap();
        let names: Vec<(&str, bool)> = kids.iter().map(|c| (c.name.as_str(), c.is_dir)).collect();
        assert_eq!(names, vec![("5", true), ("6", true), ("type", false)], "{label}");
    }
}

#[test]
fn read_type_trims_trailing_newline() {
    for (label, tree, _guard) in trees() {
        tree.write("/items/type", b"widget\n").unwrap();
        assert_eq!(tree.read_type("/items").as_deref(), Some("widget"), "{label}");
        assert_eq!(tree.read_type("/items/").as_deref(), Some("widget"), "{label}");
        assert!(tree.read_type("/other").is_none(), "{label}");
    }
}

#[test]
fn read_collection_requires_directory() {
    for (label, tree, _guard) in trees() {
        tree.write("/items/type", b"widget").unwrap();
        let c = tree.read_collection("/items/").unwrap().unwrap();
        assert_eq!(c.type_name.as_deref(), Some("widget"), "{label}");
        assert!(tree.read_collection("/items/type").unwrap().is_none(), "{label}");
        assert!(tree.read_collection("/missing/").unwrap().is_none(), "{label}");
    }
}

#[test]
fn write_instance_lays_out_type_and_data() {
    for (label, tree, _guard) in trees() {
        tree.write_instance("/items/5/", Some("widget"), br#"{"a":1}"#).unwrap();
        assert_eq!(tree.probe("/items/5/").unwrap(), Node::Dir, "{label}");
        assert_eq!(tree.read("/items/5/type").unwrap(), b"widget", "{label}");
        assert_eq!(tree.read("/items/5/data.json").unwrap(), br#"{"a":1}"#, "{label}");
    }
}

#[test]
fn counter_roundtrip_and_absence() {
    for (label, tree, _guard) in trees() {
        tree.create_dir("/items/").unwrap();
        assert!(tree.read_counter("/items/").unwrap().is_none(), "{label}");
        tree.write_counter("/items/", br#"{"nextId":3}"#).unwrap();
        assert_eq!(tree.read_counter("/items/").unwrap().unwrap(), br#"{"nextId":3}"#, "{label}");
    }
}

#[test]
fn fs_write_leaves_no_temp_files() {
    let tmp = tempfile::tempdir().unwrap();
    let tree = FsTree::new(tmp.path()).unwrap();
    tree.write("/items/data.json", b"1").unwrap();
    tree.write("/items/data.json", b"2").unwrap();
    let names: Vec<String> = tree.list_children("/items").unwrap().into_iter().map(|c| c.name).collect();
    assert_eq!(names, vec!["data.json".to_string()]);
    assert_eq!(tree.read("/items/data.json").unwrap(), b"2");
}
