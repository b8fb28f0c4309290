use isobmff_codec::bufseek::BufferedSeekReader;
use isobmff_codec::{default_registry, read_box_tree};
use proptest::prelude::*;
use std::io::{Cursor, Read, Seek, SeekFrom};

#[derive(Debug, Clone)]
enum Op {
    Seek(u64),
    SeekBack(i64),
    Read(usize),
}

fn op() -> impl Strategy<Value = Op> {
    prop_oneof![
        (0u64..600).prop_map(Op::Seek),
        (-64i64..64).prop_map(Op::SeekBack),
        (0usize..200).prop_map(Op::Read),
    ]
}

proptest! {
    #[test]
    fn behaves_like_the_wrapped_reader(
        data in prop::collection::vec(any::<u8>(), 0..512),
        block in 1usize..96,
        history in 1usize..4,
        ops in prop::collection::vec(op(), 1..40),
    ) {
        let mut plain = Cursor::new(data.clone());
        let mut cached = BufferedSeekReader::with_capacity(Cursor::new(data), block, history);

        for op in ops {
            match op {
                Op::Seek(n) => {
                    prop_assert_eq!(
                        plain.seek(SeekFrom::Start(n)).unwrap(),
                        cached.seek(SeekFrom::Start(n)).unwrap()
                    );
                }
                Op::SeekBack(d) => {
                    let a = plain.seek(SeekFrom::Current(d)).ok();
                    let b = cached.seek(SeekFrom::Current(d)).ok();
                    prop_assert_eq!(a, b);
                }
                Op::Read(n) => {
                    let mut a = Vec::new();
                    let mut b = Vec::new();
                    (&mut plain).take(n as u64).read_to_end(&mut a).unwrap();
                    (&mut cached).take(n as u64).read_to_end(&mut b).unwrap();
                    prop_assert_eq!(a, b);
                }
            }
            prop_assert_eq!(plain.stream_position().unwrap(), cached.stream_position().unwrap());
        }
        prop_assert_eq!(
            plain.seek(SeekFrom::End(-1)).ok(),
            cached.seek(SeekFrom::End(-1)).ok()
        );
    }
}

#[test]
fn tree_through_cache_matches_direct_read() {
    let mut data = Vec::new();
    for (t, payload) in [(b"free", &[1u8, 2, 3][..]), (b"skip", &[4u8; 40][..])] {
        data.extend_from_slice(&((payload.len() + 8) as u32).to_be_bytes());
        data.extend_from_slice(t);
        data.extend_from_slice(payload);
    }
    let direct = read_box_tree(&mut Cursor::new(data.clone()), default_registry()).unwrap();
    let mut cached = BufferedSeekReader::with_capacity(Cursor::new(data), 7, 2);
    let through = read_box_tree(&mut cached, default_registry()).unwrap();
    assert_eq!(direct, through);
}
