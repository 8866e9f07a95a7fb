//! End-to-end tests for the migration pipeline: staged records through
//! conversions, relation bindings, and the record store.

use std::collections::HashMap;
use std::sync::Arc;

use tablift_core::{
    ChoiceConversion, FieldRule, FormData, JoinSpec, KindSchema, Lookup, LookupRule,
    MemoryRecordStore, MigrationDefinition, MigrationRegistry, Migrator, RecordStore,
    RelationBinding, StagingStore, Value,
};

fn to_records(rows: Vec<Vec<(&str, &str)>>) -> Vec<HashMap<String, String>> {
    rows.into_iter()
        .map(|pairs| {
            pairs
                .into_iter()
                .map(|(k, v)| (k.to_string(), v.to_string()))
                .collect()
        })
        .collect()
}

fn columns(names: &[&str]) -> Vec<String> {
    names.iter().map(|n| n.to_string()).collect()
}

struct Fixture {
    staging: StagingStore,
    store: MemoryRecordStore,
    registry: MigrationRegistry,
}

/// A small publishing corpus: books referencing authors by legacy id, plus
/// chapters owned by books.
fn publishing_fixture() -> Fixture {
    let staging = StagingStore::open_in_memory().unwrap();

    let author_cols = columns(&["author_id", "author_name"]);
    staging.create_table("authors", &author_cols).unwrap();
    staging
        .bulk_insert(
            "authors",
            &author_cols,
            &to_records(vec![
                vec![("author_id", "10"), ("author_name", "Ada Lovelace")],
                vec![("author_id", "20"), ("author_name", "Grace Hopper")],
            ]),
        )
        .unwrap();

    let book_cols = columns(&["book_id", "title", "author_id", "status"]);
    staging.create_table("books", &book_cols).unwrap();
    staging
        .bulk_insert(
            "books",
            &book_cols,
            &to_records(vec![
                vec![
                    ("book_id", "1"),
                    ("title", "Sketches"),
                    ("author_id", "10"),
                    ("status", "Published"),
                ],
                vec![
                    ("book_id", "2"),
                    ("title", "Compilers"),
                    ("author_id", "20"),
                    ("status", "Draft"),
                ],
                vec![
                    ("book_id", "3"),
                    ("title", "Notes"),
                    ("author_id", "10"),
                    ("status", "unknown-status"),
                ],
            ]),
        )
        .unwrap();

    let mut registry = MigrationRegistry::new();

    let authors = MigrationDefinition::new("press", "Authors", "author", "authors")
        .with_update()
        .with_lookup("legacy_id", LookupRule::Column("author_id".into()))
        .with_presave_field("legacy_id", FieldRule::Direct("author_id".into()))
        .with_presave_field("name", FieldRule::Direct("author_name".into()));
    registry.register(authors).unwrap();

    let status_rule = ChoiceConversion::new(
        "status",
        vec![
            (Value::Int(1), "Published".to_string()),
            (Value::Int(2), "Draft".to_string()),
        ],
    )
    .unwrap()
    .with_shadow_field("raw_status");

    let books = MigrationDefinition::new("press", "Books", "book", "books")
        .with_presave_field("legacy_id", FieldRule::Direct("book_id".into()))
        .with_presave_field("title", FieldRule::Direct("title".into()))
        .with_presave_field("status", FieldRule::Rule(Arc::new(status_rule)))
        .with_presave_field("raw_status", FieldRule::Direct("raw_status".into()))
        .with_presave_relation(
            "author",
            RelationBinding::foreign_key("press.authors", "legacy_id")
                .with_local_key("author_id")
                .with_remote_key("author_id"),
        );
    registry.register(books).unwrap();

    Fixture {
        staging,
        store: MemoryRecordStore::new(),
        registry,
    }
}

#[test]
fn forward_binding_creates_related_records_on_demand() {
    let fx = publishing_fixture();
    let definition = fx.registry.get("press.books").unwrap().clone();
    let migrator = Migrator::new(definition, &fx.staging, &fx.store, &fx.registry).unwrap();

    let stats = migrator.run(0).unwrap();
    assert_eq!(stats.migrated, 3);

    // Three books, but only two authors: the second book for author 10
    // reuses the record created for the first.
    assert_eq!(fx.store.row_count("book"), 3);
    assert_eq!(fx.store.row_count("author"), 2);

    let sketches = fx
        .store
        .find_one("book", &Lookup::from_entry("legacy_id", Value::Int(1)))
        .unwrap()
        .unwrap();
    let author_pk = fx.store.read_attr(&sketches, "author").unwrap();
    let ada = fx
        .store
        .find_one("author", &Lookup::from_entry("legacy_id", Value::Int(10)))
        .unwrap()
        .unwrap();
    assert_eq!(author_pk, Value::Int(ada.pk));
}

#[test]
fn forward_binding_with_existing_match_skips_nested_migration() {
    let fx = publishing_fixture();

    // Pre-create both authors, then count saves during the book run.
    let authors = fx.registry.get("press.authors").unwrap().clone();
    Migrator::new(authors, &fx.staging, &fx.store, &fx.registry)
        .unwrap()
        .run(0)
        .unwrap();
    let saves_before = fx.store.save_count();

    let books = fx.registry.get("press.books").unwrap().clone();
    Migrator::new(books, &fx.staging, &fx.store, &fx.registry)
        .unwrap()
        .run(0)
        .unwrap();

    // Three book saves and nothing else: the nested author migration's
    // persistence path never ran.
    assert_eq!(fx.store.save_count(), saves_before + 3);
    assert_eq!(fx.store.row_count("author"), 2);
}

#[test]
fn choice_conversion_shadow_field_lands_in_output() {
    let fx = publishing_fixture();
    let definition = fx.registry.get("press.books").unwrap().clone();
    let migrator = Migrator::new(definition, &fx.staging, &fx.store, &fx.registry).unwrap();
    migrator.run(0).unwrap();

    let published = fx
        .store
        .find_one("book", &Lookup::from_entry("legacy_id", Value::Int(1)))
        .unwrap()
        .unwrap();
    assert_eq!(fx.store.read_attr(&published, "status").unwrap(), Value::Int(1));
    assert!(fx.store.read_attr(&published, "raw_status").is_err());

    // The unmatched status is audited through the shadow column, which the
    // later field mapping copies into the output.
    let odd = fx
        .store
        .find_one("book", &Lookup::from_entry("legacy_id", Value::Int(3)))
        .unwrap()
        .unwrap();
    assert_eq!(fx.store.read_attr(&odd, "status").unwrap(), Value::Null);
    assert_eq!(
        fx.store.read_attr(&odd, "raw_status").unwrap(),
        Value::Text("unknown-status".into())
    );
}

#[test]
fn reverse_binding_always_reruns_nested_migration() {
    let staging = StagingStore::open_in_memory().unwrap();
    let book_cols = columns(&["book_id", "title", "preface"]);
    staging.create_table("books", &book_cols).unwrap();
    staging
        .bulk_insert(
            "books",
            &book_cols,
            &to_records(vec![vec![
                ("book_id", "1"),
                ("title", "Sketches"),
                ("preface", "First words"),
            ]]),
        )
        .unwrap();

    let store = MemoryRecordStore::new();
    let mut registry = MigrationRegistry::new();

    // Chapters live in the same tablespace row and point back at the book.
    let chapters = MigrationDefinition::new("press", "Prefaces", "chapter", "books")
        .without_purge()
        .with_presave_field("body", FieldRule::Direct("preface".into()));
    registry.register(chapters).unwrap();

    let books = MigrationDefinition::new("press", "Books", "book", "books")
        .with_update()
        .with_lookup("legacy_id", LookupRule::Column("book_id".into()))
        .with_presave_field("legacy_id", FieldRule::Direct("book_id".into()))
        .with_presave_field("title", FieldRule::Direct("title".into()))
        .with_postsave_relation(
            "chapters",
            RelationBinding::reverse("press.prefaces").with_related_field("book"),
        );
    registry.register(books).unwrap();

    let definition = registry.get("press.books").unwrap().clone();
    let migrator = Migrator::new(definition, &staging, &store, &registry).unwrap();

    migrator.run(0).unwrap();
    assert_eq!(store.row_count("chapter"), 1);
    let saves_after_first = store.save_count();

    // Re-running refreshes the existing chapter instead of duplicating it,
    // and its persistence path runs again.
    migrator.run(0).unwrap();
    assert_eq!(store.row_count("chapter"), 1);
    assert!(store.save_count() > saves_after_first);

    let chapter = store
        .find_one("chapter", &Lookup::from_entry("body", Value::Text("First words".into())))
        .unwrap()
        .unwrap();
    let book = store
        .find_one("book", &Lookup::from_entry("legacy_id", Value::Int(1)))
        .unwrap()
        .unwrap();
    assert_eq!(store.read_attr(&chapter, "book").unwrap(), Value::Int(book.pk));
}

#[test]
fn generic_reverse_binding_writes_type_tag_pair() {
    let staging = StagingStore::open_in_memory().unwrap();
    let cols = columns(&["book_id", "title", "remark"]);
    staging.create_table("books", &cols).unwrap();
    staging
        .bulk_insert(
            "books",
            &cols,
            &to_records(vec![vec![
                ("book_id", "1"),
                ("title", "Sketches"),
                ("remark", "fragile binding"),
            ]]),
        )
        .unwrap();

    let store = MemoryRecordStore::new();
    let mut registry = MigrationRegistry::new();

    let notes = MigrationDefinition::new("press", "Notes", "note", "books")
        .without_purge()
        .with_presave_field("text", FieldRule::Direct("remark".into()));
    registry.register(notes).unwrap();

    let books = MigrationDefinition::new("press", "Books", "book", "books")
        .with_presave_field("title", FieldRule::Direct("title".into()))
        .with_postsave_relation("notes", RelationBinding::generic_reverse("press.notes"));
    registry.register(books).unwrap();

    let definition = registry.get("press.books").unwrap().clone();
    Migrator::new(definition, &staging, &store, &registry)
        .unwrap()
        .run(0)
        .unwrap();

    let note = store
        .find_one(
            "note",
            &Lookup::from_entry("text", Value::Text("fragile binding".into())),
        )
        .unwrap()
        .unwrap();
    let book = store
        .find_one("book", &Lookup::from_entry("title", Value::Text("Sketches".into())))
        .unwrap()
        .unwrap();

    assert_eq!(
        store.read_attr(&note, "object_id").unwrap(),
        Value::Int(book.pk)
    );
    assert_eq!(
        store.read_attr(&note, "content_type").unwrap(),
        Value::Int(store.type_tag("book"))
    );
}

#[test]
fn many_to_many_binding_accumulates_ordered_list() {
    let staging = StagingStore::open_in_memory().unwrap();

    let tag_cols = columns(&["tag_id", "label"]);
    staging.create_table("tags", &tag_cols).unwrap();
    staging
        .bulk_insert(
            "tags",
            &tag_cols,
            &to_records(vec![
                vec![("tag_id", "1"), ("label", "science")],
                vec![("tag_id", "2"), ("label", "history")],
            ]),
        )
        .unwrap();

    let book_cols = columns(&["book_id", "title", "tag_a", "tag_b"]);
    staging.create_table("books", &book_cols).unwrap();
    staging
        .bulk_insert(
            "books",
            &book_cols,
            &to_records(vec![vec![
                ("book_id", "1"),
                ("title", "Sketches"),
                ("tag_a", "2"),
                ("tag_b", "1"),
            ]]),
        )
        .unwrap();

    let store = MemoryRecordStore::new();
    let mut registry = MigrationRegistry::new();

    let tags = MigrationDefinition::new("press", "Tags", "tag", "tags")
        .with_update()
        .with_lookup("legacy_id", LookupRule::Column("tag_id".into()))
        .with_presave_field("legacy_id", FieldRule::Direct("tag_id".into()))
        .with_presave_field("label", FieldRule::Direct("label".into()));
    registry.register(tags).unwrap();

    let books = MigrationDefinition::new("press", "Books", "book", "books")
        .with_presave_field("title", FieldRule::Direct("title".into()))
        .with_presave_relation(
            "tags",
            RelationBinding::many_to_many("press.tags", "legacy_id")
                .with_local_key("tag_a")
                .with_remote_key("tag_id"),
        )
        .with_presave_relation(
            "tags",
            RelationBinding::many_to_many("press.tags", "legacy_id")
                .with_local_key("tag_b")
                .with_remote_key("tag_id"),
        );
    registry.register(books).unwrap();

    let definition = registry.get("press.books").unwrap().clone();
    Migrator::new(definition, &staging, &store, &registry)
        .unwrap()
        .run(0)
        .unwrap();

    let book = store
        .find_one("book", &Lookup::from_entry("title", Value::Text("Sketches".into())))
        .unwrap()
        .unwrap();
    let history = store
        .find_one("tag", &Lookup::from_entry("legacy_id", Value::Int(2)))
        .unwrap()
        .unwrap();
    let science = store
        .find_one("tag", &Lookup::from_entry("legacy_id", Value::Int(1)))
        .unwrap()
        .unwrap();

    // Binding declaration order is preserved: tag_a (history) before tag_b.
    assert_eq!(
        store.read_attr(&book, "tags").unwrap(),
        Value::List(vec![Value::Int(history.pk), Value::Int(science.pk)])
    );
}

#[test]
fn unresolvable_forward_binding_is_logged_not_fatal() {
    let staging = StagingStore::open_in_memory().unwrap();

    let author_cols = columns(&["author_id", "author_name"]);
    staging.create_table("authors", &author_cols).unwrap();

    let book_cols = columns(&["book_id", "title", "author_id"]);
    staging.create_table("books", &book_cols).unwrap();
    staging
        .bulk_insert(
            "books",
            &book_cols,
            &to_records(vec![vec![
                ("book_id", "1"),
                ("title", "Orphan"),
                ("author_id", "404"),
            ]]),
        )
        .unwrap();

    let store = MemoryRecordStore::new();
    let mut registry = MigrationRegistry::new();

    let authors = MigrationDefinition::new("press", "Authors", "author", "authors")
        .with_presave_field("name", FieldRule::Direct("author_name".into()));
    registry.register(authors).unwrap();

    let books = MigrationDefinition::new("press", "Books", "book", "books")
        .with_presave_field("title", FieldRule::Direct("title".into()))
        .with_presave_relation(
            "author",
            RelationBinding::foreign_key("press.authors", "legacy_id")
                .with_local_key("author_id")
                .with_remote_key("author_id"),
        );
    registry.register(books).unwrap();

    let definition = registry.get("press.books").unwrap().clone();
    let stats = Migrator::new(definition, &staging, &store, &registry)
        .unwrap()
        .run(0)
        .unwrap();

    // The book still migrates; the author slot is simply absent.
    assert_eq!(stats.migrated, 1);
    let book = store
        .find_one("book", &Lookup::from_entry("title", Value::Text("Orphan".into())))
        .unwrap()
        .unwrap();
    assert!(store.read_attr(&book, "author").is_err());
    assert_eq!(store.row_count("author"), 0);
}

#[test]
fn auxiliary_tablespace_join_feeds_conversions() {
    let staging = StagingStore::open_in_memory().unwrap();

    let book_cols = columns(&["book_id", "title", "press_id"]);
    staging.create_table("books", &book_cols).unwrap();
    staging
        .bulk_insert(
            "books",
            &book_cols,
            &to_records(vec![vec![
                ("book_id", "1"),
                ("title", "Sketches"),
                ("press_id", "5"),
            ]]),
        )
        .unwrap();

    let press_cols = columns(&["press_id", "press_name"]);
    staging.create_table("presses", &press_cols).unwrap();
    staging
        .bulk_insert(
            "presses",
            &press_cols,
            &to_records(vec![vec![("press_id", "5"), ("press_name", "Analytical")]]),
        )
        .unwrap();

    let store = MemoryRecordStore::new();
    let registry = MigrationRegistry::new();

    let definition = MigrationDefinition::new("press", "Books", "book", "books")
        .with_join(JoinSpec::left("presses", "press_id", "press_id"))
        .with_presave_field("title", FieldRule::Direct("title".into()))
        .with_presave_field("publisher", FieldRule::Direct("press_name".into()));

    Migrator::new(definition, &staging, &store, &registry)
        .unwrap()
        .run(0)
        .unwrap();

    let book = store
        .find_one("book", &Lookup::from_entry("title", Value::Text("Sketches".into())))
        .unwrap()
        .unwrap();
    assert_eq!(
        store.read_attr(&book, "publisher").unwrap(),
        Value::Text("Analytical".into())
    );
}

#[test]
fn validation_skip_rolls_back_nested_work() {
    let staging = StagingStore::open_in_memory().unwrap();

    let author_cols = columns(&["author_id", "author_name"]);
    staging.create_table("authors", &author_cols).unwrap();
    staging
        .bulk_insert(
            "authors",
            &author_cols,
            &to_records(vec![vec![("author_id", "10"), ("author_name", "Ada")]]),
        )
        .unwrap();

    let book_cols = columns(&["book_id", "author_id"]);
    staging.create_table("books", &book_cols).unwrap();
    staging
        .bulk_insert(
            "books",
            &book_cols,
            &to_records(vec![vec![("book_id", "1"), ("author_id", "10")]]),
        )
        .unwrap();

    let store = MemoryRecordStore::new();
    // Books require a title; the staged record has none, so every book is
    // skipped after its author has been created mid-pipeline.
    store.define_kind("book", KindSchema::new().with_required("title"));

    let mut registry = MigrationRegistry::new();
    let authors = MigrationDefinition::new("press", "Authors", "author", "authors")
        .with_presave_field("name", FieldRule::Direct("author_name".into()));
    registry.register(authors).unwrap();

    let books = MigrationDefinition::new("press", "Books", "book", "books")
        .with_presave_relation(
            "author",
            RelationBinding::foreign_key("press.authors", "legacy_id")
                .with_local_key("author_id")
                .with_remote_key("author_id"),
        );
    registry.register(books).unwrap();

    let definition = registry.get("press.books").unwrap().clone();
    let stats = Migrator::new(definition, &staging, &store, &registry)
        .unwrap()
        .run(0)
        .unwrap();

    assert_eq!(stats.skipped, 1);
    assert_eq!(store.row_count("book"), 0);
    // The record's transaction committed nothing, including the author
    // created while resolving the relation.
    assert_eq!(store.row_count("author"), 0);
}

#[test]
fn initial_values_survive_defaults_overlay() {
    let staging = StagingStore::open_in_memory().unwrap();
    let cols = columns(&["id"]);
    staging.create_table("rows", &cols).unwrap();
    staging
        .bulk_insert("rows", &cols, &to_records(vec![vec![("id", "1")]]))
        .unwrap();

    let store = MemoryRecordStore::new();
    let registry = MigrationRegistry::new();

    let definition = MigrationDefinition::new("press", "Rows", "row", "rows")
        .with_default("source", Value::Text("legacy".into()));
    let migrator = Migrator::new(definition, &staging, &store, &registry).unwrap();

    let mut raw = staging.select_all("rows", &Lookup::new(), &[]).unwrap().remove(0);
    let mut initial = FormData::new();
    initial.insert("source", Value::Text("injected".into()));

    let reference = migrator.migrate_record(&mut raw, None, &initial).unwrap().unwrap();
    assert_eq!(
        store.read_attr(&reference, "source").unwrap(),
        Value::Text("injected".into())
    );
}
