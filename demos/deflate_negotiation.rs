//! permessage-deflate Negotiation Demo
//!
//! Plays both sides of an RFC 7692 negotiation in-process, then pushes a
//! few kernel-sized messages through the negotiated compressors.
//!
//! Run with: cargo run --example deflate_negotiation

use kernelbox::ws::deflate::EXTENSION_NAME;
use kernelbox::ws::extension::{format_extension, parse_extension_header};
use kernelbox::ws::{ClientDeflateFactory, Extension, Frame, ServerDeflateFactory};

fn main() -> Result<(), Box<dyn std::error::Error>> {
    println!("┌─────────────────────────────────────────┐");
    println!("│  permessage-deflate Negotiation Demo    │");
    println!("└─────────────────────────────────────────┘\n");

    let client_factory = ClientDeflateFactory::default();
    let server_factory = ServerDeflateFactory::default();

    // ─────────────────────────────────────────────────────────────────────
    // Step 1: Client offer
    // ─────────────────────────────────────────────────────────────────────
    let offer = format_extension(EXTENSION_NAME, &client_factory.request_params()?);
    println!("1. Client offers:    {offer}");

    // ─────────────────────────────────────────────────────────────────────
    // Step 2: Server response
    // ─────────────────────────────────────────────────────────────────────
    let (_, offered) = parse_extension_header(&offer)?
        .into_iter()
        .next()
        .ok_or("empty offer")?;
    let (response_params, mut server) = server_factory.process_request_params(&offered, &[])?;
    let response = format_extension(EXTENSION_NAME, &response_params);
    println!("2. Server responds:  {response}");
    println!("   server settles on {:?}\n", server.config());

    // ─────────────────────────────────────────────────────────────────────
    // Step 3: Client accepts
    // ─────────────────────────────────────────────────────────────────────
    let (_, answered) = parse_extension_header(&response)?
        .into_iter()
        .next()
        .ok_or("empty response")?;
    let mut client = client_factory.process_response_params(&answered, &[])?;
    println!("3. Client settles on {:?}\n", client.config());

    // ─────────────────────────────────────────────────────────────────────
    // Step 4: Compress client → server
    // ─────────────────────────────────────────────────────────────────────
    println!("4. Messages (context carried over between messages):\n");
    let message = r#"{"header":{"msg_type":"execute_request"},"content":{"code":"print('hello')"}}"#;
    for round in 1..=3 {
        let encoded = client.encode(Frame::text(message))?;
        let decoded = server.decode(encoded.clone(), None)?;
        assert_eq!(decoded.payload, message.as_bytes());
        println!(
            "   round {round}: {:>3} bytes → {:>3} bytes on the wire",
            message.len(),
            encoded.payload.len()
        );
    }
    Ok(())
}
