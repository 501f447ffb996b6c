//! Reference lite server functions used for probing peers.

use super::LiteFunction;
use crate::tl::{TlError, TlReader, TlWriter};

pub const GET_TIME: u32 = 0x16ad_5a34;
pub const CURRENT_TIME: u32 = 0xe953_000d;
pub const GET_MASTERCHAIN_INFO: u32 = 0x89b5_e62e;
pub const MASTERCHAIN_INFO: u32 = 0x8583_2881;

/// `liteServer.getTime = liteServer.CurrentTime`
#[derive(Debug, Clone, Copy, Default)]
pub struct GetTime;

impl LiteFunction for GetTime {
    type Request = ();
    /// Remote unix time in seconds.
    type Response = i32;

    fn name(&self) -> &'static str {
        "liteServer.getTime"
    }

    fn encode_request(&self, _request: &(), writer: &mut TlWriter) {
        writer.write_u32(GET_TIME);
    }

    fn decode_response(&self, reader: &mut TlReader<'_>) -> Result<i32, TlError> {
        reader.expect_constructor(CURRENT_TIME)?;
        let now = reader.read_i32()?;
        reader.finish()?;
        Ok(now)
    }
}

/// `tonNode.blockIdExt`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BlockIdExt {
    pub workchain: i32,
    pub shard: i64,
    pub seqno: i32,
    pub root_hash: [u8; 32],
    pub file_hash: [u8; 32],
}

impl BlockIdExt {
    fn read(reader: &mut TlReader<'_>) -> Result<Self, TlError> {
        Ok(Self {
            workchain: reader.read_i32()?,
            shard: reader.read_i64()?,
            seqno: reader.read_i32()?,
            root_hash: reader.read_int256()?,
            file_hash: reader.read_int256()?,
        })
    }

    pub fn write(&self, writer: &mut TlWriter) {
        writer.write_i32(self.workchain);
        writer.write_i64(self.shard);
        writer.write_i32(self.seqno);
        writer.write_int256(&self.root_hash);
        writer.write_int256(&self.file_hash);
    }
}

/// `tonNode.zeroStateIdExt`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ZeroStateIdExt {
    pub workchain: i32,
    pub root_hash: [u8; 32],
    pub file_hash: [u8; 32],
}

/// `liteServer.masterchainInfo`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MasterchainInfo {
    pub last: BlockIdExt,
    pub state_root_hash: [u8; 32],
    pub init: ZeroStateIdExt,
}

impl MasterchainInfo {
    /// Encodes the boxed response. Used by peers and test servers.
    pub fn write(&self, writer: &mut TlWriter) {
        writer.write_u32(MASTERCHAIN_INFO);
        self.last.write(writer);
        writer.write_int256(&self.state_root_hash);
        writer.write_i32(self.init.workchain);
        writer.write_int256(&self.init.root_hash);
        writer.write_int256(&self.init.file_hash);
    }
}

/// `liteServer.getMasterchainInfo = liteServer.MasterchainInfo`
#[derive(Debug, Clone, Copy, Default)]
pub struct GetMasterchainInfo;

impl LiteFunction for GetMasterchainInfo {
    type Request = ();
    type Response = MasterchainInfo;

    fn name(&self) -> &'static str {
        "liteServer.getMasterchainInfo"
    }

    fn encode_request(&self, _request: &(), writer: &mut TlWriter) {
        writer.write_u32(GET_MASTERCHAIN_INFO);
    }

    fn decode_response(&self, reader: &mut TlReader<'_>) -> Result<MasterchainInfo, TlError> {
        reader.expect_constructor(MASTERCHAIN_INFO)?;
        let last = BlockIdExt::read(reader)?;
        let state_root_hash = reader.read_int256()?;
        let init = ZeroStateIdExt {
            workchain: reader.read_i32()?,
            root_hash: reader.read_int256()?,
            file_hash: reader.read_int256()?,
        };
        reader.finish()?;
        Ok(MasterchainInfo { last, state_root_hash, init })
    }
}
