use povcyl_protocol::{TELEMETRY_START, TelemetryDecoder, TelemetryStatus};

fn main() {
    let capture = b"POV ready\r\n{c120}{p62500}{s3}Main menu\r\n{p57143}{z9}";
    let mut decoder = TelemetryDecoder::new();
    let mut status = TelemetryStatus::default();
    let mut in_field = false;

    for &b in capture.iter() {
        if !in_field {
            if b == TELEMETRY_START {
                in_field = true;
            } else {
                print!("{}", b as char);
            }
            continue;
        }
        if let Some(field) = decoder.push(b) {
            in_field = false;
            match field.telemetry() {
                Some(t) => {
                    status.apply(t);
                    println!("\n{:?} -> {}", t, status);
                }
                None => println!("\nignored field tag {:?}", field.tag as char),
            }
        }
    }
}
