//! Fuzz target for pack decoding and delta resolution.
//!
//! Decodes arbitrary bytes as a pack and resolves whatever deltas it yields.

#![no_main]

use libfuzzer_sys::fuzz_target;
use tokio_util::sync::CancellationToken;
use wisp_git::{DeltaResolver, ObjectMap, PackReader, PackedObject};
use wisp_storage::MemoryStorage;

fuzz_target!(|data: &[u8]| {
    let Ok(reader) = PackReader::new(data) else {
        return;
    };

    let mut objects = ObjectMap::new();
    let mut deltas = Vec::new();
    for entry in reader {
        match entry {
            Ok(PackedObject::Object(object)) => {
                objects.insert(object.id, object);
            }
            Ok(PackedObject::Delta(delta)) => deltas.push(delta),
            Err(_) => return,
        }
    }

    let storage = MemoryStorage::new();
    let cancel = CancellationToken::new();
    let _ = DeltaResolver::new(&storage, &cancel).resolve(deltas, &mut objects);
});
