use hex_literal::hex;
use isobmff_codec::{RewriteStats, Rewriter, default_registry, rewrite, traverse};
use std::io::Cursor;

fn bx(t: &[u8; 4], payload: &[u8]) -> Vec<u8> {
    let mut out = ((payload.len() + 8) as u32).to_be_bytes().to_vec();
    out.extend_from_slice(t);
    out.extend_from_slice(payload);
    out
}

fn rewritten(data: &[u8]) -> (Vec<u8>, RewriteStats) {
    let (out, stats) = rewrite(
        &mut Cursor::new(data.to_vec()),
        Cursor::new(Vec::new()),
        default_registry(),
    )
    .unwrap();
    (out.into_inner(), stats)
}

#[test]
fn rewrite_reproduces_file() {
    let mut data = bx(b"ftyp", b"isom\0\0\x02\0isomiso2");
    let mut moov = bx(b"mvex", &bx(b"mehd", &hex!("01 000000 0000000000002710")));
    let mut stbl = bx(b"stsz", &hex!("00 000000 00000000 00000002 00000010 00000020"));
    stbl.extend(bx(b"stco", &hex!("00 000000 00000001 00000030")));
    stbl.extend(bx(b"avc1", &[0; 6]));
    moov.extend(bx(b"trak", &bx(b"stbl", &stbl)));
    moov.extend(bx(b"mvhd", &hex!("05 000000 0102")));
    data.extend(bx(b"moov", &moov));
    data.extend(hex!("00000001 6d646174 0000000000000013 aabbcc"));

    let (out, stats) = rewritten(&data);
    assert_eq!(hex::encode(&out), hex::encode(&data));
    // avc1 is unregistered, mvhd v5 unsupported, mdat never read
    assert_eq!(stats, RewriteStats { encoded: 8, copied: 3 });
}

#[test]
fn quicktime_containers_keep_their_layout() {
    let mut data = bx(b"ftyp", b"qt  \0\0\x02\0qt  ");
    let meta = hex!("00000010 6d657461 00000008 66726565");
    let mut udta = bx(b"free", &[]);
    udta.extend(hex!("00000000"));
    let mut moov = meta.to_vec();
    moov.extend(bx(b"udta", &udta));
    data.extend(bx(b"moov", &moov));

    let (out, stats) = rewritten(&data);
    assert_eq!(&out[28..44], &meta);
    assert_eq!(&out[44..48], &hex!("00000014"));
    assert_eq!(hex::encode(&out), hex::encode(&data));
    assert_eq!(stats, RewriteStats { encoded: 2, copied: 2 });
}

#[test]
fn iso_meta_is_reencoded() {
    let mut meta = hex!("00000000").to_vec();
    meta.extend(bx(b"free", &[9, 9]));
    let data = bx(b"meta", &meta);

    let (out, stats) = rewritten(&data);
    assert_eq!(out, data);
    assert_eq!(stats, RewriteStats { encoded: 1, copied: 1 });
}

#[test]
fn extends_to_end_box_stays_open_ended() {
    let mut data = bx(b"ftyp", b"isom\0\0\0\0");
    data.extend(hex!("00000000 6d646174 aabbcc"));

    let (out, _) = rewritten(&data);
    assert_eq!(out, data);
}

#[test]
fn rewriter_counts_as_it_visits() {
    let data = bx(b"moov", &bx(b"abcd", &[1, 2, 3]));
    let mut rw = Rewriter::new(Cursor::new(Vec::new()));
    traverse(&mut Cursor::new(data.clone()), default_registry(), &mut rw).unwrap();
    assert_eq!(rw.stats(), RewriteStats { encoded: 1, copied: 1 });
    let (out, _) = rw.finish().unwrap();
    assert_eq!(out.into_inner(), data);
}
