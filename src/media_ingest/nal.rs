//! NAL unit helpers for H.264 and H.265 elementary streams.

use super::types::CodecFamily;

const START_CODE: [u8; 4] = [0, 0, 0, 1];

/// NAL units of an Annex-B buffer, without their start codes.
pub fn split_annex_b(data: &[u8]) -> Vec<&[u8]> {
    let mut starts = Vec::new();
    let mut i = 0;
    while i + 3 <= data.len() {
        if data[i] == 0 && data[i + 1] == 0 && data[i + 2] == 1 {
            starts.push((i, i + 3));
            i += 3;
        } else {
            i += 1;
        }
    }

    let mut units = Vec::with_capacity(starts.len());
    for (idx, &(_, payload_start)) in starts.iter().enumerate() {
        let mut end = match starts.get(idx + 1) {
            Some(&(next_code, _)) => next_code,
            None => data.len(),
        };
        // trailing zero belongs to the next 4-byte start code
        while end > payload_start && data[end - 1] == 0 && idx + 1 < starts.len() {
            end -= 1;
        }
        if end > payload_start {
            units.push(&data[payload_start..end]);
        }
    }
    units
}

/// NAL unit type from the first header byte.
pub fn nal_type(family: CodecFamily, header: u8) -> u8 {
    match family {
        CodecFamily::H264 => header & 0x1F,
        CodecFamily::H265 => (header >> 1) & 0x3F,
    }
}

/// H.264 IDR slice, or any H.265 IRAP picture (BLA, IDR, CRA).
pub fn is_key_frame_nal(family: CodecFamily, header: u8) -> bool {
    let kind = nal_type(family, header);
    match family {
        CodecFamily::H264 => kind == 5,
        CodecFamily::H265 => (16..=21).contains(&kind),
    }
}

pub fn contains_key_frame(family: CodecFamily, annex_b: &[u8]) -> bool {
    split_annex_b(annex_b)
        .iter()
        .any(|unit| is_key_frame_nal(family, unit[0]))
}

/// Annex-B encoding of `units`, each prefixed with a 4-byte start code.
pub fn to_annex_b<T: AsRef<[u8]>>(units: &[T]) -> Vec<u8> {
    let mut out = Vec::with_capacity(units.iter().map(|u| u.as_ref().len() + 4).sum());
    for unit in units {
        out.extend_from_slice(&START_CODE);
        out.extend_from_slice(unit.as_ref());
    }
    out
}

/// Converts length-prefixed NAL units (AVCC/HVCC sample format) into Annex-B.
pub fn length_prefixed_to_annex_b(data: &[u8], length_size: usize) -> Result<Vec<u8>, String> {
    if !(1..=4).contains(&length_size) {
        return Err(format!("invalid NAL length size {}", length_size));
    }
    let mut out = Vec::with_capacity(data.len() + 16);
    let mut pos = 0;
    while pos < data.len() {
        if pos + length_size > data.len() {
            return Err(String::from("truncated NAL length prefix"));
        }
        let len = data[pos..pos + length_size]
            .iter()
            .fold(0usize, |acc, b| (acc << 8) | *b as usize);
        pos += length_size;
        if pos + len > data.len() {
            return Err(format!("NAL unit of {} bytes overruns buffer", len));
        }
        out.extend_from_slice(&START_CODE);
        out.extend_from_slice(&data[pos..pos + len]);
        pos += len;
    }
    Ok(out)
}

struct Reader<'a> {
    data: &'a [u8],
    pos: usize,
}

impl<'a> Reader<'a> {
    fn new(data: &'a [u8]) -> Self {
        Self { data, pos: 0 }
    }

    fn u8(&mut self) -> Result<u8, String> {
        let byte = *self
            .data
            .get(self.pos)
            .ok_or_else(|| String::from("truncated configuration record"))?;
        self.pos += 1;
        Ok(byte)
    }

    fn u16(&mut self) -> Result<usize, String> {
        Ok(((self.u8()? as usize) << 8) | self.u8()? as usize)
    }

    fn bytes(&mut self, len: usize) -> Result<&'a [u8], String> {
        let end = self.pos + len;
        let slice = self
            .data
            .get(self.pos..end)
            .ok_or_else(|| String::from("truncated configuration record"))?;
        self.pos = end;
        Ok(slice)
    }

    fn skip(&mut self, len: usize) -> Result<(), String> {
        self.bytes(len).map(|_| ())
    }
}

/// SPS and PPS units of an `AVCDecoderConfigurationRecord` (avcC box).
pub fn parse_avcc(record: &[u8]) -> Result<Vec<Vec<u8>>, String> {
    let mut r = Reader::new(record);
    if r.u8()? != 1 {
        return Err(String::from("unsupported avcC version"));
    }
    r.skip(3)?;
    let _length_size = (r.u8()? & 0x03) + 1;

    let mut units = Vec::new();
    let sps_count = r.u8()? & 0x1F;
    for _ in 0..sps_count {
        let len = r.u16()?;
        units.push(r.bytes(len)?.to_vec());
    }
    let pps_count = r.u8()?;
    for _ in 0..pps_count {
        let len = r.u16()?;
        units.push(r.bytes(len)?.to_vec());
    }
    Ok(units)
}

/// VPS, SPS and PPS units of an `HEVCDecoderConfigurationRecord` (hvcC box).
pub fn parse_hvcc(record: &[u8]) -> Result<Vec<Vec<u8>>, String> {
    let mut r = Reader::new(record);
    if r.u8()? != 1 {
        return Err(String::from("unsupported hvcC version"));
    }
    r.skip(21)?;

    let mut units = Vec::new();
    let arrays = r.u8()?;
    for _ in 0..arrays {
        let _nal_type = r.u8()? & 0x3F;
        let count = r.u16()?;
        for _ in 0..count {
            let len = r.u16()?;
            units.push(r.bytes(len)?.to_vec());
        }
    }
    Ok(units)
}

/// Parameter sets of a decoder configuration record of the given family.
pub fn parameter_sets(family: CodecFamily, record: &[u8]) -> Result<Vec<Vec<u8>>, String> {
    match family {
        CodecFamily::H264 => parse_avcc(record),
        CodecFamily::H265 => parse_hvcc(record),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn split_handles_three_and_four_byte_start_codes() {
        let data = [0, 0, 0, 1, 0x67, 0xAA, 0, 0, 1, 0x68, 0xBB, 0, 0, 0, 1, 0x65, 0xCC, 0xDD];
        let expected: Vec<&[u8]> = vec![&[0x67, 0xAA], &[0x68, 0xBB], &[0x65, 0xCC, 0xDD]];
        assert_eq!(split_annex_b(&data), expected);
    }

    #[test]
    fn split_ignores_data_without_start_code() {
        assert!(split_annex_b(&[0x65, 0x88, 0x00]).is_empty());
        assert!(split_annex_b(&[]).is_empty());
        assert!(split_annex_b(&[0, 0, 1]).is_empty());
    }

    #[test]
    fn key_frame_found_after_parameter_sets() {
        let au = to_annex_b(&[vec![0x67, 1], vec![0x68, 2], vec![0x65, 3]]);
        assert!(contains_key_frame(CodecFamily::H264, &au));

        let p_frame = to_annex_b(&[vec![0x09, 0xF0], vec![0x41, 3]]);
        assert!(!contains_key_frame(CodecFamily::H264, &p_frame));
    }

    #[test]
    fn hevc_irap_range() {
        // CRA_NUT (21) header 0x2A 0x01, TRAIL_R (1) header 0x02 0x01
        assert!(is_key_frame_nal(CodecFamily::H265, 0x2A));
        assert!(is_key_frame_nal(CodecFamily::H265, 0x20));
        assert!(!is_key_frame_nal(CodecFamily::H265, 0x02));
        // VPS (32) is not a picture
        assert!(!is_key_frame_nal(CodecFamily::H265, 0x40));
    }

    #[test]
    fn length_prefixed_units_become_annex_b() {
        let avcc = [0, 0, 0, 2, 0x65, 0x01, 0, 0, 0, 1, 0x41];
        let annex_b = length_prefixed_to_annex_b(&avcc, 4).unwrap();
        assert_eq!(annex_b, vec![0, 0, 0, 1, 0x65, 0x01, 0, 0, 0, 1, 0x41]);
    }

    #[test]
    fn overrunning_length_is_rejected() {
        assert!(length_prefixed_to_annex_b(&[0, 0, 0, 9, 0x65], 4).is_err());
        assert!(length_prefixed_to_annex_b(&[0, 0], 4).is_err());
        assert!(length_prefixed_to_annex_b(&[1, 0x65], 0).is_err());
    }

    #[test]
    fn avcc_record_yields_sps_and_pps() {
        let record = [
            1, 0x64, 0x00, 0x1F, 0xFF, // version, profile, compat, level, length size 4
            0xE1, 0, 3, 0x67, 0x64, 0x00, // one SPS
            1, 0, 2, 0x68, 0xEE, // one PPS
        ];
        let units = parse_avcc(&record).unwrap();
        assert_eq!(units, vec![vec![0x67, 0x64, 0x00], vec![0x68, 0xEE]]);
    }

    #[test]
    fn truncated_avcc_is_an_error() {
        assert!(parse_avcc(&[1, 0x64, 0x00, 0x1F, 0xFF, 0xE1, 0, 9, 0x67]).is_err());
        assert!(parse_avcc(&[0]).is_err());
    }

    #[test]
    fn hvcc_record_yields_all_arrays() {
        let mut record = vec![1];
        record.extend_from_slice(&[0u8; 21]);
        record.push(2); // arrays
        record.extend_from_slice(&[0x20, 0, 1, 0, 2, 0x40, 0x01]); // VPS
        record.extend_from_slice(&[0x21, 0, 1, 0, 2, 0x42, 0x01]); // SPS
        let units = parameter_sets(CodecFamily::H265, &record).unwrap();
        assert_eq!(units, vec![vec![0x40, 0x01], vec![0x42, 0x01]]);
    }
}
