//! End-to-end tests driving the real binaries: collect two translation
//! units, merge them, convert the result, and format it.

use std::fs;

use assert_cmd::Command;
use predicates::str::contains;
use tempfile::tempdir;

#[test]
fn collect_merge_convert_format_round_trip() {
    let dir = tempdir().unwrap();
    let a = dir.path().join("a.cpp");
    let b = dir.path().join("b.cpp");
    fs::write(&a, "int helper() { return 42; }\nint main() { return helper(); }\n").unwrap();
    fs::write(&b, "int helper();\nvoid other() { helper(); }\n").unwrap();

    Command::cargo_bin("cgcollect")
        .unwrap()
        .args([a.to_str().unwrap(), b.to_str().unwrap()])
        .current_dir(dir.path())
        .assert()
        .success();

    let a_ipcg = dir.path().join("a.ipcg");
    let b_ipcg = dir.path().join("b.ipcg");
    assert!(a_ipcg.exists());
    assert!(b_ipcg.exists());

    let whole = dir.path().join("whole.mcg");
    Command::cargo_bin("cgmerge")
        .unwrap()
        .arg(whole.to_str().unwrap())
        .arg(a_ipcg.to_str().unwrap())
        .arg(b_ipcg.to_str().unwrap())
        .assert()
        .success();

    let doc: serde_json::Value = serde_json::from_str(&fs::read_to_string(&whole).unwrap()).unwrap();
    let names: Vec<&str> = doc["_CG"]["nodes"]
        .as_array()
        .unwrap()
        .iter()
        .map(|entry| entry[1]["functionName"].as_str().unwrap())
        .collect();
    assert!(names.contains(&"main"));
    assert!(names.contains(&"helper"));
    assert!(names.contains(&"other"));

    let v2 = dir.path().join("whole_v2.mcg");
    Command::cargo_bin("cgconvert")
        .unwrap()
        .arg(whole.to_str().unwrap())
        .arg(v2.to_str().unwrap())
        .arg("2")
        .assert()
        .success();
    let v2_doc: serde_json::Value = serde_json::from_str(&fs::read_to_string(&v2).unwrap()).unwrap();
    assert_eq!(v2_doc["_MetaCG"]["version"], "2.0");
    assert!(v2_doc["_CG"]["main"]["callees"].as_array().unwrap().contains(&serde_json::json!("helper")));

    let formatted = dir.path().join("whole_fmt.mcg");
    Command::cargo_bin("cgformat")
        .unwrap()
        .arg(whole.to_str().unwrap())
        .arg(formatted.to_str().unwrap())
        .assert()
        .success();
    let formatted_text = fs::read_to_string(&formatted).unwrap();
    // top-level keys come back sorted: "_CG" before "_MetaCG"
    assert!(formatted_text.find("\"_CG\"").unwrap() < formatted_text.find("\"_MetaCG\"").unwrap());
}

/// §8 scenario 2: a function-pointer table indexed dynamically, whose
/// elements alias two different candidates. `table[i]()` must resolve to
/// both, not just whichever one happened to be assigned last.
#[test]
fn function_pointer_table_resolves_to_every_assigned_candidate() {
    let dir = tempdir().unwrap();
    let src = dir.path().join("dispatch.cpp");
    fs::write(
        &src,
        "int func1() { return 1; }\n\
         int func2() { return 2; }\n\
         typedef int (*fp_t)();\n\
         int find_p_func(int i) {\n\
         \x20   fp_t table[2];\n\
         \x20   table[0] = &func1;\n\
         \x20   table[1] = &func2;\n\
         \x20   return table[i]();\n\
         }\n\
         int main() { return find_p_func(0); }\n",
    )
    .unwrap();

    Command::cargo_bin("cgcollect")
        .unwrap()
        .args(["--alias-model", "all", src.to_str().unwrap()])
        .current_dir(dir.path())
        .assert()
        .success();

    let doc: serde_json::Value = serde_json::from_str(&fs::read_to_string(src.with_extension("ipcg")).unwrap()).unwrap();
    let names_by_id: std::collections::HashMap<&str, &str> = doc["_CG"]["nodes"]
        .as_array()
        .unwrap()
        .iter()
        .map(|n| (n[0].as_str().unwrap(), n[1]["functionName"].as_str().unwrap()))
        .collect();
    let edges: Vec<(&str, &str)> = doc["_CG"]["edges"]
        .as_array()
        .unwrap()
        .iter()
        .map(|e| (names_by_id[e[0][0].as_str().unwrap()], names_by_id[e[0][1].as_str().unwrap()]))
        .collect();
    assert!(edges.contains(&("find_p_func", "func1")));
    assert!(edges.contains(&("find_p_func", "func2")));
    assert!(edges.contains(&("main", "find_p_func")));
}

/// §8 scenario 3: a call through a base-class pointer must reach both the
/// base's own definition and every override, with `OverrideMD` recording
/// the relationship, even when the call site lives in a different
/// translation unit than either definition.
#[test]
fn virtual_call_across_translation_units_reaches_base_and_override() {
    let dir = tempdir().unwrap();
    let base_tu = dir.path().join("shapes.cpp");
    let caller_tu = dir.path().join("caller.cpp");
    fs::write(
        &base_tu,
        "struct Base { virtual int foo() { return 1; } };\n\
         struct Child1 : Base { int foo() override { return 2; } };\n",
    )
    .unwrap();
    fs::write(
        &caller_tu,
        "struct Base { virtual int foo(); };\n\
         int caller(Base* b) { return b->foo(); }\n\
         int main() { return caller(0); }\n",
    )
    .unwrap();

    Command::cargo_bin("cgcollect")
        .unwrap()
        .args([base_tu.to_str().unwrap(), caller_tu.to_str().unwrap()])
        .current_dir(dir.path())
        .assert()
        .success();

    let whole = dir.path().join("whole.mcg");
    Command::cargo_bin("cgmerge")
        .unwrap()
        .arg(whole.to_str().unwrap())
        .arg(base_tu.with_extension("ipcg").to_str().unwrap())
        .arg(caller_tu.with_extension("ipcg").to_str().unwrap())
        .assert()
        .success();

    let doc: serde_json::Value = serde_json::from_str(&fs::read_to_string(&whole).unwrap()).unwrap();
    let nodes = doc["_CG"]["nodes"].as_array().unwrap();
    let names_by_id: std::collections::HashMap<&str, &str> =
        nodes.iter().map(|n| (n[0].as_str().unwrap(), n[1]["functionName"].as_str().unwrap())).collect();
    let edges: Vec<(&str, &str)> = doc["_CG"]["edges"]
        .as_array()
        .unwrap()
        .iter()
        .map(|e| (names_by_id[e[0][0].as_str().unwrap()], names_by_id[e[0][1].as_str().unwrap()]))
        .collect();
    assert!(edges.contains(&("caller", "Base::foo")));
    assert!(edges.contains(&("caller", "Child1::foo")));

    let child = nodes.iter().find(|n| n[1]["functionName"] == "Child1::foo").unwrap();
    let base = nodes.iter().find(|n| n[1]["functionName"] == "Base::foo").unwrap();
    assert!(!child[1]["meta"]["overrideMD"]["overrides"].as_array().unwrap().is_empty());
    assert!(!base[1]["meta"]["overrideMD"]["overriddenBy"].as_array().unwrap().is_empty());
}

/// §8 scenario 6: merging the same function name from two different
/// origins keeps them distinct under MergeByNameAndOrigin, and the v3
/// node-key scheme reflects it (two nodes, not one).
#[test]
fn merge_by_name_and_origin_keeps_same_named_nodes_from_different_files_distinct() {
    let dir = tempdir().unwrap();
    let a = dir.path().join("a.cpp");
    let b = dir.path().join("b.cpp");
    fs::write(&a, "int foo() { return 1; }\nint main() { return foo(); }\n").unwrap();
    fs::write(&b, "int foo() { return 2; }\n").unwrap();

    Command::cargo_bin("cgcollect")
        .unwrap()
        .args([a.to_str().unwrap(), b.to_str().unwrap()])
        .current_dir(dir.path())
        .assert()
        .success();

    let doc_a: serde_json::Value = serde_json::from_str(&fs::read_to_string(a.with_extension("ipcg")).unwrap()).unwrap();
    let doc_b: serde_json::Value = serde_json::from_str(&fs::read_to_string(b.with_extension("ipcg")).unwrap()).unwrap();
    let registry = cg_core::default_registry();
    let source_a = cg_core::io::read(&doc_a, &registry).unwrap();
    let source_b = cg_core::io::read(&doc_b, &registry).unwrap();

    let mut dest = cg_core::Graph::new(cg_core::IdScheme::NameAndOrigin);
    cg_merge::merge_into(&mut dest, &source_a, &cg_merge::MergeByNameAndOrigin, &registry).unwrap();
    cg_merge::merge_into(&mut dest, &source_b, &cg_merge::MergeByNameAndOrigin, &registry).unwrap();
    assert_eq!(dest.find_by_name("foo").len(), 2);

    let mut dest_by_name = cg_core::Graph::new(cg_core::IdScheme::NameOnly);
    cg_merge::merge_into(&mut dest_by_name, &source_a, &cg_merge::MergeByName, &registry).unwrap();
    cg_merge::merge_into(&mut dest_by_name, &source_b, &cg_merge::MergeByName, &registry).unwrap();
    let foo_ids = dest_by_name.find_by_name("foo");
    assert_eq!(foo_ids.len(), 1);
    assert_eq!(dest_by_name.node(foo_ids[0]).unwrap().origin.as_deref(), Some(a.to_str().unwrap()));
}

#[test]
fn cgcollect_reports_no_main_as_a_warning_not_a_failure() {
    let dir = tempdir().unwrap();
    let src = dir.path().join("lib.cpp");
    fs::write(&src, "int helper() { return 1; }\n").unwrap();

    Command::cargo_bin("cgcollect")
        .unwrap()
        .arg(src.to_str().unwrap())
        .current_dir(dir.path())
        .assert()
        .success();
    assert!(dir.path().join("lib.ipcg").exists());
}

#[test]
fn cgcollect_rejects_missing_input_with_argument_error() {
    Command::cargo_bin("cgcollect")
        .unwrap()
        .arg("--bogus-flag")
        .assert()
        .failure()
        .code(1)
        .stderr(contains("error"));
}

#[test]
fn cgmerge_validate_only_does_not_write_output() {
    let dir = tempdir().unwrap();
    let src = dir.path().join("a.cpp");
    fs::write(&src, "int main() { return 0; }\n").unwrap();
    Command::cargo_bin("cgcollect").unwrap().arg(src.to_str().unwrap()).assert().success();
    let ipcg = src.with_extension("ipcg");

    let out = dir.path().join("out.mcg");
    Command::cargo_bin("cgmerge")
        .unwrap()
        .arg(out.to_str().unwrap())
        .arg(ipcg.to_str().unwrap())
        .arg("--validate-only")
        .assert()
        .success();
    assert!(!out.exists());
}

#[test]
fn cgformat_discards_unparsable_metadata_when_requested() {
    let dir = tempdir().unwrap();
    let doc = serde_json::json!({
        "_MetaCG": { "generator": { "name": "x", "version": "1" }, "version": "3.0" },
        "_CG": {
            "nodes": [["1", { "functionName": "f", "origin": "", "hasBody": true, "meta": { "someFutureMD": {"x": 1} } }]],
            "edges": [],
        }
    });
    let input = dir.path().join("in.mcg");
    fs::write(&input, serde_json::to_string(&doc).unwrap()).unwrap();
    let output = dir.path().join("out.mcg");

    Command::cargo_bin("cgformat")
        .unwrap()
        .arg(input.to_str().unwrap())
        .arg(output.to_str().unwrap())
        .arg("--discard-unparsable-metadata")
        .assert()
        .success();

    let out_doc: serde_json::Value = serde_json::from_str(&fs::read_to_string(&output).unwrap()).unwrap();
    let meta = &out_doc["_CG"]["nodes"][0][1]["meta"];
    assert!(meta.as_object().unwrap().is_empty(), "expected unparsable metadata to be dropped, got {meta}");
}
