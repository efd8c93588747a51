//! Basic usage example for the vendor opcode codec.

use mesh_wire::{decode, decode_text, encode, encode_text, Opcode};

fn main() -> Result<(), Box<dyn std::error::Error>> {
    println!("=== Mesh Opcode Codec Example ===\n");

    // 1. Encode a text message
    println!("1. Encoding a text message...");
    let hello = Opcode::try_from(0xfbf105)?;
    let message = encode_text(hello, "Participant")?;
    println!("   Encoded {} bytes: {:02x?}", message.len(), message.as_ref());

    // 2. Decode it back
    println!("\n2. Decoding the message...");
    let (opcode, rest) = decode(&message)?;
    println!("   Opcode: {}", opcode);
    println!("   Text: {:?}", decode_text(rest)?);

    // 3. Raw payloads
    println!("\n3. Raw payload...");
    let raw = encode(Opcode::from_u24(0x8204), &[0x01, 0x00]);
    println!("   Encoded {} bytes: {:02x?}", raw.len(), raw.as_ref());

    // 4. Short input is rejected
    println!("\n4. Short input...");
    match decode(&[0xfb, 0xf1]) {
        Ok(_) => println!("   Unexpectedly decoded"),
        Err(e) => println!("   Rejected: {}", e),
    }

    println!("\n=== Example completed successfully! ===");
    Ok(())
}
