pub mod decoder;        // Byte slice -> typed value conversions
pub mod layout;         // Layout catalog and key resolution
pub mod message;        // Frame -> record pipeline
pub mod packet;         // Header, protocol/message enums, validation
pub mod packet_decoder; // Stream -> frame splitting
pub mod record;         // Decoded records and field extraction
pub mod scrambler;      // XOR payload obfuscation
