//! End-to-end scenarios against the public store API.

use pagerope::{Store, StoreConfig, StoreError, Whence};
use std::fs::File;
use std::io::Write;

fn file_with(bytes: &[u8]) -> File {
    let mut file = tempfile::tempfile().unwrap();
    file.write_all(bytes).unwrap();
    file
}

fn pattern(len: usize) -> Vec<u8> {
    (0..len).map(|i| b'a' + (i % 26) as u8).collect()
}

fn contents(store: &mut Store, text: pagerope::TextId) -> Vec<u8> {
    let mut out = Vec::new();
    store.flush_to(text, &mut out).unwrap();
    out
}

#[test]
fn test_hello_world_excise() {
    let mut store = Store::new();
    let text = store.open(None).unwrap();
    store.put_bytes(text, b"hello world").unwrap();
    store.seek(text, 5, Whence::Start).unwrap();

    let cut = store.excise(text, 6).unwrap().unwrap();
    assert_eq!(store.rope_bytes(&cut).unwrap(), b" world");
    assert_eq!(contents(&mut store, text), b"hello");
    assert_eq!(store.len(text).unwrap(), 5);
    store.discard(cut).unwrap();
    store.verify().unwrap();
}

#[test]
fn test_backward_reads_over_file() {
    let data = pattern(10_000);
    let mut store = Store::new();
    let (_, rope) = store.open_file(file_with(&data)).unwrap();
    let text = store.open(Some(rope)).unwrap();

    store.seek(text, 9_999, Whence::Start).unwrap();
    for i in 0..20 {
        let expected = data[9_998 - i];
        assert_eq!(store.back_up(text).unwrap(), Some(expected));
    }
    assert_eq!(store.tell(text).unwrap(), 9_979);
    assert_eq!(store.get_char(text).unwrap(), Some(data[9_979]));
    store.verify().unwrap();
}

#[test]
fn test_forward_read_of_file_pages_lazily() {
    let data = pattern(5_000);
    let mut store = Store::new();
    let (_, rope) = store.open_file(file_with(&data)).unwrap();
    let text = store.open(Some(rope)).unwrap();

    let mut read = Vec::new();
    for _ in 0..700 {
        read.push(store.get_char(text).unwrap().unwrap());
    }
    assert_eq!(read, &data[..700]);
    let stats = store.stats();
    assert!(stats.resident_bytes < data.len());
    assert_eq!(store.remaining(text).unwrap(), 4_300);
    assert_eq!(contents(&mut store, text), data);
    store.verify().unwrap();
}

#[test]
fn test_edit_file_backed_text() {
    let data = pattern(3_000);
    let mut store = Store::new();
    let (file, rope) = store.open_file(file_with(&data)).unwrap();
    let text = store.open(Some(rope)).unwrap();

    store.seek(text, 1_500, Whence::Start).unwrap();
    store.put_bytes(text, b"<inserted>").unwrap();
    store.seek(text, 100, Whence::Start).unwrap();
    assert_eq!(store.delete(text, 50).unwrap(), 50);

    let mut expected = data.clone();
    expected.splice(1_500..1_500, b"<inserted>".iter().copied());
    expected.drain(100..150);
    assert_eq!(contents(&mut store, text), expected);
    assert!(store.file_in_use(text, file).unwrap());
    store.verify().unwrap();

    // Writing everything to swap releases the source file.
    let rope = store.close(text).unwrap();
    store.compact(4).unwrap();
    let text = store.open(Some(rope)).unwrap();
    assert!(!store.file_in_use(text, file).unwrap());
    assert!(store.close_file(file).unwrap().is_some());
    assert_eq!(contents(&mut store, text), expected);
    store.verify().unwrap();
}

#[test]
fn test_changed_source_keeps_resident_text() {
    let data = pattern(5_000);
    let file = file_with(&data);
    let handle = file.try_clone().unwrap();
    let mut store = Store::new();
    let (_, rope) = store.open_file(file).unwrap();
    let text = store.open(Some(rope)).unwrap();

    let mut read = Vec::new();
    for _ in 0..100 {
        read.push(store.get_char(text).unwrap().unwrap());
    }
    assert_eq!(read, &data[..100]);
    let dirty_before = store.stats().dirty_fragments;

    handle.set_len(1_000).unwrap();
    store.seek(text, 3_000, Whence::Start).unwrap();
    let err = store.get_char(text).unwrap_err();
    assert!(matches!(
        err,
        StoreError::SourceChanged { expected: 5_000, actual: 1_000, .. }
    ));

    // The resident prefix is the only good copy left: it turned dirty and
    // survives being pushed out to swap.
    assert!(store.stats().dirty_fragments > dirty_before);
    store.compact(3).unwrap();
    assert!(store.stats().swap_bytes > 0);
    store.rewind(text).unwrap();
    let mut again = Vec::new();
    for _ in 0..100 {
        again.push(store.get_char(text).unwrap().unwrap());
    }
    assert_eq!(again, &data[..100]);
}

#[test]
fn test_exhaustion_with_open_cursor() {
    let config = StoreConfig::default()
        .with_arena_limit(64 * 1024)
        .with_arena_initial(16 * 1024);
    let mut store = Store::with_config(config);
    let text = store.open(None).unwrap();
    let data = pattern(256 * 1024);

    store.put_bytes(text, &data).unwrap();
    let stats = store.stats();
    assert!(stats.compactions > 0);
    assert!(stats.swap_bytes > 0);
    assert!(stats.arena.committed <= 64 * 1024);
    store.verify().unwrap();

    // The cursor's fragment survived every pass: keep typing, then read back.
    store.put_bytes(text, b"tail").unwrap();
    assert_eq!(store.tell(text).unwrap(), data.len() as u64 + 4);
    store.rewind(text).unwrap();
    let mut read = Vec::with_capacity(data.len() + 4);
    while let Some(byte) = store.get_char(text).unwrap() {
        read.push(byte);
    }
    assert_eq!(&read[..data.len()], &data[..]);
    assert_eq!(&read[data.len()..], b"tail");
    store.verify().unwrap();
}

#[test]
fn test_exhaustion_is_reported_not_fatal() {
    let config = StoreConfig::default()
        .with_arena_limit(8 * 1024)
        .with_arena_initial(8 * 1024)
        .with_compaction_max_level(1);
    let mut store = Store::with_config(config);
    let text = store.open(None).unwrap();

    let err = store.put_bytes(text, &pattern(64 * 1024)).unwrap_err();
    assert!(err.is_exhausted());
    assert!(matches!(err, StoreError::AllocatorExhausted { .. }));
    store.verify().unwrap();
}

#[test]
fn test_excise_insert_roundtrip() {
    let data = pattern(2_000);
    let mut store = Store::with_config(StoreConfig::default().with_window_size(64));
    let text = store.open(None).unwrap();
    store.put_bytes(text, &data).unwrap();

    store.seek(text, 700, Whence::Start).unwrap();
    let cut = store.excise(text, 900).unwrap().unwrap();
    assert_eq!(store.rope_len(&cut).unwrap(), 900);
    assert_eq!(store.len(text).unwrap(), 1_100);
    store.insert(text, cut).unwrap();
    assert_eq!(store.tell(text).unwrap(), 1_600);
    assert_eq!(contents(&mut store, text), data);

    store.seek(text, 0, Whence::End).unwrap();
    let cut = store.excise(text, -300).unwrap().unwrap();
    assert_eq!(store.rope_bytes(&cut).unwrap(), &data[1_700..]);
    store.insert(text, cut).unwrap();
    assert_eq!(contents(&mut store, text), data);
    store.verify().unwrap();
}

#[test]
fn test_compaction_keeps_text() {
    let mut store = Store::with_config(StoreConfig::default().with_window_size(32));
    let a = store.open(None).unwrap();
    let b = store.open(None).unwrap();
    store.put_bytes(a, &pattern(1_000)).unwrap();
    store.put_bytes(b, b"second text object").unwrap();
    store.seek(a, 400, Whence::Start).unwrap();
    store.put_bytes(a, b"!!").unwrap();

    let before_a = contents(&mut store, a);
    let before_b = contents(&mut store, b);
    for level in 0..6 {
        store.compact(level).unwrap();
        store.verify().unwrap();
        assert_eq!(contents(&mut store, a), before_a);
        assert_eq!(contents(&mut store, b), before_b);
    }
    assert_eq!(store.tell(a).unwrap(), 402);
    assert_eq!(store.get_char(a).unwrap(), Some(before_a[402]));
}

#[test]
fn test_overwrite_mode_toggle() {
    let mut store = Store::new();
    let text = store.open(None).unwrap();
    store.put_bytes(text, b"abcdef").unwrap();
    store.seek(text, 1, Whence::Start).unwrap();
    store.set_overwrite(text, true).unwrap();
    store.put_bytes(text, b"XY").unwrap();
    store.set_overwrite(text, false).unwrap();
    store.put_bytes(text, b"-").unwrap();
    assert_eq!(contents(&mut store, text), b"aXY-def");
    store.verify().unwrap();
}

#[test]
fn test_copy_between_texts() {
    let mut store = Store::new();
    let src = store.open(None).unwrap();
    let dst = store.open(None).unwrap();
    store.put_bytes(src, b"copy me please").unwrap();
    store.put_bytes(dst, b"[]").unwrap();

    store.seek(src, 5, Whence::Start).unwrap();
    let copy = store.copy(src, 2).unwrap().unwrap();
    assert_eq!(store.tell(src).unwrap(), 5);
    store.seek(dst, 1, Whence::Start).unwrap();
    store.insert(dst, copy).unwrap();

    assert_eq!(contents(&mut store, src), b"copy me please");
    assert_eq!(contents(&mut store, dst), b"[me]");
    store.verify().unwrap();
}

#[test]
fn test_unknown_handles() {
    let mut store = Store::new();
    let text = store.open(None).unwrap();
    store.close(text).unwrap();
    assert!(matches!(store.get_char(text), Err(StoreError::UnknownText(_))));

    let (file, rope) = store.open_file(file_with(b"x")).unwrap();
    store.discard(rope).unwrap();
    assert_eq!(store.sweep_files(), 1);
    assert!(matches!(store.close_file(file), Err(StoreError::UnknownFile(_))));
}
