//! ISOBMFF (MP4) box inspection utilities.
//! Used to validate what the box writer produced without a full demuxer.

/// Boxes whose payload is itself a sequence of boxes.
pub const CONTAINER_BOXES: &[&[u8; 4]] = &[
    b"moov", b"trak", b"mdia", b"minf", b"stbl", b"dinf", b"mvex", b"moof", b"traf",
];

/// Walk all top-level boxes in a buffer, and recursively traverse specified container boxes.
/// `callback` is invoked for EVERY box in pre-order traversal.
/// The callback signature is `|box_type: &[u8; 4], payload: &[u8]|`.
pub fn walk_boxes<'a, F>(data: &'a [u8], containers: &[&[u8; 4]], callback: &mut F)
where
    F: FnMut(&[u8; 4], &'a [u8]),
{
    let mut pos = 0;
    while pos + 8 <= data.len() {
        let size =
            u32::from_be_bytes([data[pos], data[pos + 1], data[pos + 2], data[pos + 3]]) as usize;
        if size < 8 || pos + size > data.len() {
            break;
        }
        let btype = [data[pos + 4], data[pos + 5], data[pos + 6], data[pos + 7]];
        let payload = &data[pos + 8..pos + size];

        callback(&btype, payload);

        if containers.contains(&&btype) {
            walk_boxes(payload, containers, callback);
        }

        pos += size;
    }
}

/// Payload of the first box of type `wanted`, searching inside `containers`.
/// Sample entries (`stsd`, `mp4a`, `avc1`) are opaque to the walker, so
/// boxes nested in them are located by scanning the `stsd` payload.
pub fn find_box<'a>(data: &'a [u8], wanted: &[u8; 4], containers: &[&[u8; 4]]) -> Option<&'a [u8]> {
    let mut found = None;
    let mut stsd = None;
    walk_boxes(data, containers, &mut |btype, payload| {
        if found.is_none() && btype == wanted {
            found = Some(payload);
        }
        if btype == b"stsd" {
            stsd = Some(payload);
        }
    });
    found.or_else(|| stsd.and_then(|payload| scan_for_box(payload, wanted)))
}

fn scan_for_box<'a>(data: &'a [u8], wanted: &[u8; 4]) -> Option<&'a [u8]> {
    let pos = data.windows(4).position(|w| w == wanted)?;
    let start = pos.checked_sub(4)?;
    let size = read_u32(data, start)? as usize;
    if size < 8 || start + size > data.len() {
        return None;
    }
    Some(&data[pos + 4..start + size])
}

/// Types of the top-level boxes, in order.
pub fn top_level_types(data: &[u8]) -> Vec<[u8; 4]> {
    let mut types = Vec::new();
    walk_boxes(data, &[], &mut |btype, _| types.push(*btype));
    types
}

pub fn read_u32(data: &[u8], offset: usize) -> Option<u32> {
    let bytes = data.get(offset..offset + 4)?;
    Some(u32::from_be_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]))
}

pub fn read_u64(data: &[u8], offset: usize) -> Option<u64> {
    let hi = read_u32(data, offset)? as u64;
    let lo = read_u32(data, offset + 4)? as u64;
    Some((hi << 32) | lo)
}
