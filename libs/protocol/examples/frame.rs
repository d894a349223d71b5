use povcyl_protocol::{
    MAX_TRANSFER_PAYLOAD, crc16_ccitt, decode_transfer_frame, encode_transfer_frame,
    transfer_frame_len,
};

/// Builds the transfer frame for an image file and dumps its first bytes.
fn main() {
    let Some(path) = std::env::args().nth(1) else {
        eprintln!("usage: frame <image-file>");
        std::process::exit(2);
    };
    let data = match std::fs::read(&path) {
        Ok(d) => d,
        Err(e) => {
            eprintln!("read {path}: {e}");
            std::process::exit(1);
        }
    };
    if data.len() > MAX_TRANSFER_PAYLOAD {
        eprintln!("{path}: {} bytes, limit is {MAX_TRANSFER_PAYLOAD}", data.len());
        std::process::exit(1);
    }

    let mut raw = vec![0u8; transfer_frame_len(data.len())];
    let len = encode_transfer_frame(&data, &mut raw).unwrap();
    println!("payload {} bytes, crc 0x{:04X}", data.len(), crc16_ccitt(&data));
    println!("frame len {}", len);
    println!("head: {:02x?}", &raw[..len.min(16)]);
    println!("tail: {:02x?}", &raw[len.saturating_sub(4)..len]);

    let frame = decode_transfer_frame(&raw[..len]).unwrap();
    assert_eq!(frame.payload, &data[..]);
}
