//! Minimal SynthDef (SCgf version 2) encoder.
//!
//! Only used to build the disk-record SynthDef in-process, so the bridge can
//! record any channel count without shipping compiled defs:
//!
//! ```text
//! Control.kr(bufnum, in) -> In.ar(in, n) -> DiskOut.ar(bufnum, [..n])
//! ```

const RATE_CONTROL: i8 = 1;
const RATE_AUDIO: i8 = 2;

/// Name of the disk-record SynthDef for a channel count.
pub fn disk_record_def_name(channels: u16) -> String {
    format!("scbridge_disk_record_{}", channels)
}

struct UGenSpec {
    class: &'static str,
    rate: i8,
    /// (ugen index, output index)
    inputs: Vec<(i32, i32)>,
    outputs: Vec<i8>,
}

/// Encode the disk-record SynthDef for `channels` channels.
pub fn disk_record_def(channels: u16) -> Vec<u8> {
    let n = channels as i32;
    let ugens = vec![
        UGenSpec {
            class: "Control",
            rate: RATE_CONTROL,
            inputs: vec![],
            outputs: vec![RATE_CONTROL, RATE_CONTROL],
        },
        UGenSpec {
            class: "In",
            rate: RATE_AUDIO,
            inputs: vec![(0, 1)],
            outputs: vec![RATE_AUDIO; channels as usize],
        },
        UGenSpec {
            class: "DiskOut",
            rate: RATE_AUDIO,
            inputs: std::iter::once((0, 0)).chain((0..n).map(|i| (1, i))).collect(),
            outputs: vec![RATE_AUDIO],
        },
    ];

    let mut buf = Vec::with_capacity(128 + 8 * channels as usize);
    buf.extend_from_slice(b"SCgf");
    buf.extend_from_slice(&2i32.to_be_bytes());
    buf.extend_from_slice(&1i16.to_be_bytes());

    write_pstring(&mut buf, &disk_record_def_name(channels));

    // constants
    buf.extend_from_slice(&0i32.to_be_bytes());

    // parameters: initial values, then names
    let params = [("bufnum", 0.0f32), ("in", 0.0f32)];
    buf.extend_from_slice(&(params.len() as i32).to_be_bytes());
    for (_, value) in &params {
        buf.extend_from_slice(&value.to_be_bytes());
    }
    buf.extend_from_slice(&(params.len() as i32).to_be_bytes());
    for (index, (name, _)) in params.iter().enumerate() {
        write_pstring(&mut buf, name);
        buf.extend_from_slice(&(index as i32).to_be_bytes());
    }

    buf.extend_from_slice(&(ugens.len() as i32).to_be_bytes());
    for ugen in &ugens {
        write_pstring(&mut buf, ugen.class);
        buf.push(ugen.rate as u8);
        buf.extend_from_slice(&(ugen.inputs.len() as i32).to_be_bytes());
        buf.extend_from_slice(&(ugen.outputs.len() as i32).to_be_bytes());
        buf.extend_from_slice(&0i16.to_be_bytes()); // special index
        for (src, out) in &ugen.inputs {
            buf.extend_from_slice(&src.to_be_bytes());
            buf.extend_from_slice(&out.to_be_bytes());
        }
        for rate in &ugen.outputs {
            buf.push(*rate as u8);
        }
    }

    // variants
    buf.extend_from_slice(&0i16.to_be_bytes());
    buf
}

fn write_pstring(buf: &mut Vec<u8>, s: &str) {
    let bytes = s.as_bytes();
    let len = bytes.len().min(255);
    buf.push(len as u8);
    buf.extend_from_slice(&bytes[..len]);
}
