/// Computes the Modbus/ANSI CRC16 used to validate frame integrity.
///
/// Register starts at `0xFFFF`; each input byte is XORed into the low byte,
/// then shifted out LSB-first with the `0xA001` reflected polynomial. The
/// accessory firmware checks this exact variant, so the loop is kept
/// bit-for-bit identical to the device's reference implementation.
///
/// ```
/// use nabi::crc16;
///
/// // Published CRC16/MODBUS check value.
/// assert_eq!(0x4B37, crc16(b"123456789"));
/// assert_eq!(0xE181, crc16(&[0x01, 0x02]));
/// ```
#[must_use]
pub fn crc16(data: &[u8]) -> u16 {
    let mut crc: u16 = 0xFFFF;
    for &byte in data {
        crc ^= u16::from(byte);
        for _ in 0..8 {
            if crc & 0x0001 != 0 {
                crc = (crc >> 1) ^ 0xA001;
            } else {
                crc >>= 1;
            }
        }
    }
    crc
}
