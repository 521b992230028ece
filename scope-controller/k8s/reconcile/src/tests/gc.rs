use super::*;
use crate::{
    binding,
    gc::delete_matching,
    owner::{self, Ownership},
};

fn mk_bindings(instance: &ScopeInstance) -> Vec<Binding> {
    let template = mk_template("tmpl", "uid-t", &[("view", &["alice"]), ("edit", &["bob"])]);
    let own = Ownership::new(instance, &template).unwrap();
    binding::synthesize(instance, &template, &own)
        .into_iter()
        .map(|d| d.binding)
        .collect()
}

#[tokio::test]
async fn deletes_both_kinds() {
    let store = MemStore::default();
    let cluster = mk_instance("a", "uid-a", "tmpl", &[]);
    let namespaced = mk_instance("a", "uid-a", "tmpl", &["ns-a"]);
    for b in mk_bindings(&cluster)
        .into_iter()
        .chain(mk_bindings(&namespaced))
    {
        store.seed(b);
    }
    for b in mk_bindings(&mk_instance("b", "uid-b", "tmpl", &["ns-a"])) {
        store.seed(b);
    }

    let deleted = delete_matching(&store, &owner::instance_selector("uid-a"))
        .await
        .unwrap();
    assert_eq!(deleted, 4);
    assert_eq!(store.bindings().len(), 2);
    assert_eq!(store.take_mutations().len(), 4);
}

#[tokio::test]
async fn ignores_bindings_already_gone() {
    let store = MemStore::default();
    let instance = mk_instance("a", "uid-a", "tmpl", &[]);
    let mut bindings = mk_bindings(&instance).into_iter();
    store.seed(bindings.next().unwrap());
    let mut ghost = bindings.next().unwrap();
    ghost.metadata_mut().name = Some("edit-gone".to_string());
    store.seed_ghost(ghost);

    let deleted = delete_matching(&store, &owner::instance_selector("uid-a"))
        .await
        .unwrap();
    assert_eq!(deleted, 1);
    assert!(store.bindings().is_empty());
}

#[tokio::test]
async fn propagates_failures() {
    let store = MemStore::default();
    for b in mk_bindings(&mk_instance("a", "uid-a", "tmpl", &[])) {
        store.seed(b);
    }
    store.fail_deletes();

    let error = delete_matching(&store, &owner::instance_selector("uid-a"))
        .await
        .unwrap_err();
    assert!(matches!(error, Error::Timeout { op: "delete" }));
    assert_eq!(store.bindings().len(), 2);
}
