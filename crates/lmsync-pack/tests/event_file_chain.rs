use lmsync_event::{
    ChangeOperation, Event, EventCodec, EventDraft, EventPayload, MasterDataEventRecord,
};
use lmsync_pack::{read_event_files, Compression, EventFile, EventFileChain, PackError};
use lmsync_types::{FacilityId, GroupId};

fn master_data_events(n: usize) -> Vec<Event> {
    let sender = FacilityId::random();
    let group = GroupId::master_data(&sender);
    (0..n)
        .map(|i| {
            EventDraft::new(
                sender,
                EventPayload::MasterData(MasterDataEventRecord {
                    schema: "referencedata".into(),
                    table: "orderables".into(),
                    operation: ChangeOperation::Insert,
                    column_names: vec!["id".into(), "code".into(), "name".into()],
                    column_values: vec![
                        Some(format!("o-{i}")),
                        Some(format!("C{i:04}")),
                        Some(format!("Product number {i}")),
                    ],
                    primary_key: vec!["id".into()],
                    snapshot_version: Some(1),
                }),
            )
            .in_group(Some(group))
            .into_event(i as u64 + 1)
        })
        .collect()
}

#[test]
fn hundred_events_through_777_byte_files_read_back_in_order() {
    let dir = tempfile::tempdir().unwrap();
    let events = master_data_events(100);
    let codec = EventCodec::default();

    let mut chain = EventFileChain::new(dir.path(), "batch", 777, codec.clone());
    for event in &events {
        chain.write(event).unwrap();
    }
    let paths = chain.finish().unwrap();
    assert!(paths.len() > 1, "expected several files, got {}", paths.len());

    let read = read_event_files(&paths, &codec, Compression::None).unwrap();
    assert_eq!(read.len(), 100);
    assert_eq!(read, events);
}

#[test]
fn hand_rolled_chain_with_manual_rollover() {
    let dir = tempfile::tempdir().unwrap();
    let events = master_data_events(100);
    let codec = EventCodec::default();

    let mut paths = Vec::new();
    let mut file = EventFile::create(dir.path().join("part-0.tmp"), 777, codec.clone()).unwrap();
    for event in &events {
        let remaining = match file.write_get_remaining_capacity(event) {
            Ok(r) => r,
            Err(PackError::OutOfCapacity { .. }) => unreachable!("rolled over too late"),
            Err(e) => panic!("{e}"),
        };
        if remaining <= 0 {
            let final_path = dir.path().join(format!("part-{}.events", paths.len()));
            file.rename_to(&final_path).unwrap();
            paths.push(final_path);
            let next = dir.path().join(format!("part-{}.tmp", paths.len()));
            file = EventFile::create(next, 777, codec.clone()).unwrap();
        }
    }
    if file.count() > 0 {
        let final_path = dir.path().join(format!("part-{}.events", paths.len()));
        file.rename_to(&final_path).unwrap();
        paths.push(final_path);
    }

    let read = read_event_files(&paths, &codec, Compression::None).unwrap();
    assert_eq!(read, events);
}

#[test]
fn compressed_chain_reads_back() {
    let dir = tempfile::tempdir().unwrap();
    let events = master_data_events(40);
    let codec = EventCodec::default();

    let mut chain =
        EventFileChain::with_compression(dir.path(), "z", 777, codec.clone(), Compression::Zstd);
    for event in &events {
        chain.write(event).unwrap();
    }
    let paths = chain.finish().unwrap();
    let read = read_event_files(&paths, &codec, Compression::Zstd).unwrap();
    assert_eq!(read, events);
}
