use super::*;

fn sample_image() -> Image {
    let code = vec![1, 0, 0, 0, 5, 0, 0, 0];
    let text = vec![2, 0, 0, 0, 72, 73, 0];
    let vtbl = vec![16, 0, 0, 0];
    let fsym = vec![0; 44];
    let csym = vec![0; 88];
    let vsym = vec![0; 44];
    Image::from_segments([&code[..], &text[..], &vtbl[..], &fsym[..], &csym[..], &vsym[..]])
}

#[test]
fn write_read() {
    let path = "test.bex";

    let image_orig = sample_image();
    write_file(path, &image_orig).unwrap();
    let image_read = read_file(path).unwrap();

    assert_eq!(image_orig, image_read);

    std::fs::remove_file(path).unwrap();
}

#[test]
fn round_trip_is_byte_identical() {
    let image = sample_image();
    let mut bytes = Vec::new();
    write(&mut bytes, &image).unwrap();
    let reread = read(&mut &bytes[..]).unwrap();
    assert_eq!(image.as_bytes(), reread.as_bytes());
}

#[test]
fn segment_contents() {
    let image = sample_image();
    assert_eq!(image.segment(Segment::Code).len(), 8);
    assert_eq!(image.segment(Segment::Text), &[2, 0, 0, 0, 72, 73, 0][..]);
    assert_eq!(image.segment(Segment::VTable), &[16, 0, 0, 0][..]);
    assert_eq!(image.segment(Segment::FunctionSymbols).len(), 44);
    assert_eq!(image.segment(Segment::ConstantSymbols).len(), 88);
    assert_eq!(image.segment(Segment::VariableSymbols).len(), 44);
}

#[test]
fn rejects_bad_magic() {
    let mut bytes = Vec::from(&sample_image().as_bytes()[..]);
    bytes[0] = b'X';
    assert!(matches!(Image::from_bytes(bytes), Err(Error::BadMagic)));
}

#[test]
fn rejects_unknown_version() {
    let mut bytes = Vec::from(&sample_image().as_bytes()[..]);
    bytes[4] = 99;
    assert!(matches!(
        Image::from_bytes(bytes),
        Err(Error::UnsupportedVersion(99))
    ));
}

#[test]
fn rejects_size_mismatch() {
    let mut bytes = Vec::from(&sample_image().as_bytes()[..]);
    bytes.push(0);
    assert!(matches!(
        Image::from_bytes(bytes),
        Err(Error::SizeMismatch { .. })
    ));
}

#[test]
fn rejects_oversized_segment() {
    let image = sample_image();
    let mut bytes = Vec::from(&image.as_bytes()[..]);
    // Inflate the CODE segment length beyond the buffer.
    bytes[16] = 0xFF;
    assert!(matches!(Image::from_bytes(bytes), Err(Error::Truncated(0))));
}

#[test]
fn rejects_wrong_tag() {
    let image = sample_image();
    let mut bytes = Vec::from(&image.as_bytes()[..]);
    bytes[12] = b'X';
    assert!(matches!(
        Image::from_bytes(bytes),
        Err(Error::BadSegmentTag(0))
    ));
}
