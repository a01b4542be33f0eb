//! Bridge event types, ABI layout, and calldata construction
//!
//! The two bridge contracts emit mirror-image events and expose mirror-image
//! entry points. The wire layout is fixed by the deployed contracts:
//!
//! ```text
//! event Deposit(address indexed user, uint256 amount, uint256 depositId, address destinationAddress)
//! event Burn   (address indexed user, uint256 amount, uint256 burnId,    address destinationAddress)
//!
//! function mint  (address recipient, uint256 amount, uint256 id) external
//! function unlock(address recipient, uint256 amount, uint256 id) external
//! function isProcessed(uint256 id) external view returns (bool)
//! ```
//!
//! Topic 1 carries the (indexed) depositor; the data section carries, in
//! order, the amount, the chain-assigned transfer id, and the destination
//! address on the counter chain. The id is the sole idempotency key on both
//! the relayer and the contracts.

use crate::error::{RelayerError, RelayerResult};

use ethers::abi::{self, ParamType, Token};
use ethers::types::{Address, Bytes, Log, H256, U256};
use ethers::utils::id as selector;

/// One relay direction: which chain is watched and which is written to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Direction {
    /// Origin chain `Deposit` -> `mint` on the remote chain.
    Deposit,
    /// Remote chain `Burn` -> `unlock` on the origin chain.
    Burn,
}

impl Direction {
    pub fn event_signature(&self) -> &'static str {
        match self {
            Direction::Deposit => "Deposit(address,uint256,uint256,address)",
            Direction::Burn => "Burn(address,uint256,uint256,address)",
        }
    }

    pub fn action_signature(&self) -> &'static str {
        match self {
            Direction::Deposit => "mint(address,uint256,uint256)",
            Direction::Burn => "unlock(address,uint256,uint256)",
        }
    }

    /// keccak256 of the event signature, i.e. topic 0 of the emitted log.
    pub fn event_topic(&self) -> H256 {
        match self {
            Direction::Deposit => *topics::DEPOSIT,
            Direction::Burn => *topics::BURN,
        }
    }

    /// Stable lowercase label for metrics and persisted state.
    pub fn label(&self) -> &'static str {
        match self {
            Direction::Deposit => "deposit",
            Direction::Burn => "burn",
        }
    }

    pub fn action_name(&self) -> &'static str {
        match self {
            Direction::Deposit => "mint",
            Direction::Burn => "unlock",
        }
    }
}

impl std::fmt::Display for Direction {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.label())
    }
}

/// Event topic signatures (keccak256 of the event signature)
pub mod topics {
    use ethers::types::H256;
    use ethers::utils::keccak256;
    use lazy_static::lazy_static;

    lazy_static! {
        pub static ref DEPOSIT: H256 =
            H256::from(keccak256("Deposit(address,uint256,uint256,address)"));
        pub static ref BURN: H256 = H256::from(keccak256("Burn(address,uint256,uint256,address)"));
    }
}

/// A lock/burn observation, as emitted by the source-side bridge contract.
///
/// Immutable once parsed; `amount` is carried verbatim from the source log
/// to the destination calldata.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransferEvent {
    pub direction: Direction,
    pub event_id: U256,
    pub user: Address,
    pub destination: Address,
    pub amount: U256,
    pub source_tx_hash: H256,
    pub source_block: u64,
}

impl TransferEvent {
    pub fn id_hex(&self) -> String {
        event_id_hex(self.event_id)
    }
}

/// Canonical 0x-prefixed 32-byte hex rendering of a transfer id, used for
/// persisted state and API lookups.
pub fn event_id_hex(id: U256) -> String {
    let mut word = [0u8; 32];
    id.to_big_endian(&mut word);
    format!("0x{}", hex::encode(word))
}

/// Parse a raw log into a [`TransferEvent`] for the given direction.
///
/// Rejects logs whose topic 0 does not match the direction's event, and logs
/// missing the fields the layout above requires.
pub fn parse_log(direction: Direction, log: &Log) -> RelayerResult<TransferEvent> {
    if log.topics.first() != Some(&direction.event_topic()) {
        return Err(RelayerError::EventParsing(format!(
            "log topic does not match {}",
            direction.event_signature()
        )));
    }

    let user_topic = log
        .topics
        .get(1)
        .ok_or_else(|| RelayerError::EventParsing("missing indexed user topic".to_string()))?;
    let user = Address::from_slice(&user_topic.0[12..32]);

    let tokens = abi::decode(
        &[
            ParamType::Uint(256),
            ParamType::Uint(256),
            ParamType::Address,
        ],
        &log.data,
    )
    .map_err(|e| RelayerError::EventParsing(format!("malformed event data: {}", e)))?;

    let amount = tokens[0]
        .clone()
        .into_uint()
        .ok_or_else(|| RelayerError::EventParsing("amount is not a uint".to_string()))?;
    let event_id = tokens[1]
        .clone()
        .into_uint()
        .ok_or_else(|| RelayerError::EventParsing("id is not a uint".to_string()))?;
    let destination = tokens[2]
        .clone()
        .into_address()
        .ok_or_else(|| RelayerError::EventParsing("destination is not an address".to_string()))?;

    let source_block = log
        .block_number
        .ok_or_else(|| RelayerError::EventParsing("log has no block number".to_string()))?
        .as_u64();
    let source_tx_hash = log
        .transaction_hash
        .ok_or_else(|| RelayerError::EventParsing("log has no transaction hash".to_string()))?;

    Ok(TransferEvent {
        direction,
        event_id,
        user,
        destination,
        amount,
        source_tx_hash,
        source_block,
    })
}

/// The counter-chain call derived from a verified event.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BridgeCall {
    pub direction: Direction,
    pub recipient: Address,
    pub amount: U256,
    pub event_id: U256,
}

impl BridgeCall {
    /// Build the mint/unlock call for a verified event. The recipient is the
    /// event's destination address, not the depositing user.
    pub fn for_event(event: &TransferEvent) -> Self {
        Self {
            direction: event.direction,
            recipient: event.destination,
            amount: event.amount,
            event_id: event.event_id,
        }
    }

    /// ABI-encoded calldata: 4-byte selector followed by the three words.
    pub fn calldata(&self) -> Bytes {
        let mut data = selector(self.direction.action_signature()).to_vec();
        data.extend(abi::encode(&[
            Token::Address(self.recipient),
            Token::Uint(self.amount),
            Token::Uint(self.event_id),
        ]));
        data.into()
    }
}

/// Calldata for the `isProcessed(uint256)` duplicate pre-check.
pub fn is_processed_calldata(event_id: U256) -> Bytes {
    let mut data = selector("isProcessed(uint256)").to_vec();
    data.extend(abi::encode(&[Token::Uint(event_id)]));
    data.into()
}

/// Decode the boolean returned by `isProcessed`.
pub fn decode_is_processed(output: &[u8]) -> RelayerResult<bool> {
    let tokens = abi::decode(&[ParamType::Bool], output)
        .map_err(|e| RelayerError::EventParsing(format!("bad isProcessed output: {}", e)))?;
    tokens[0]
        .clone()
        .into_bool()
        .ok_or_else(|| RelayerError::EventParsing("isProcessed did not return bool".to_string()))
}

/// Synthetic bridge log for tests: user `0x11…11`, destination `0x22…22`,
/// block 100, tx hash `0x…feed`.
#[cfg(test)]
pub(crate) fn sample_log(direction: Direction, event_id: U256, amount: U256) -> Log {
    use ethers::types::U64;

    let user: Address = "0x1111111111111111111111111111111111111111"
        .parse()
        .unwrap();
    let destination: Address = "0x2222222222222222222222222222222222222222"
        .parse()
        .unwrap();

    let mut user_topic = [0u8; 32];
    user_topic[12..].copy_from_slice(user.as_bytes());

    Log {
        address: "0x3333333333333333333333333333333333333333"
            .parse()
            .unwrap(),
        topics: vec![direction.event_topic(), H256::from(user_topic)],
        data: abi::encode(&[
            Token::Uint(amount),
            Token::Uint(event_id),
            Token::Address(destination),
        ])
        .into(),
        block_number: Some(U64::from(100u64)),
        transaction_hash: Some(H256::from_low_u64_be(0xfeed)),
        ..Default::default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_deposit_log() {
        let amount = U256::from(1_000_000u64);
        let event_id = U256::from(7u64);
        let log = sample_log(Direction::Deposit, event_id, amount);

        let event = parse_log(Direction::Deposit, &log).unwrap();
        assert_eq!(event.direction, Direction::Deposit);
        assert_eq!(event.amount, amount);
        assert_eq!(event.event_id, event_id);
        assert_eq!(event.source_block, 100);
        assert_eq!(
            event.destination,
            "0x2222222222222222222222222222222222222222"
                .parse::<Address>()
                .unwrap()
        );
    }

    #[test]
    fn rejects_mismatched_topic() {
        let log = sample_log(Direction::Burn, U256::one(), U256::one());
        assert!(parse_log(Direction::Deposit, &log).is_err());
    }

    #[test]
    fn rejects_truncated_data() {
        let mut log = sample_log(Direction::Deposit, U256::one(), U256::one());
        log.data = log.data[..40].to_vec().into();
        assert!(parse_log(Direction::Deposit, &log).is_err());
    }

    #[test]
    fn calldata_carries_amount_verbatim() {
        // Every byte of the 256-bit amount must survive into the calldata.
        let amount = U256::from_big_endian(&[0xAB; 32]);
        let event = parse_log(
            Direction::Deposit,
            &sample_log(Direction::Deposit, U256::from(3u64), amount),
        )
        .unwrap();

        let call = BridgeCall::for_event(&event);
        let data = call.calldata();

        assert_eq!(&data[..4], selector("mint(address,uint256,uint256)").as_slice());
        assert_eq!(data.len(), 4 + 3 * 32);

        let mut expected = [0u8; 32];
        amount.to_big_endian(&mut expected);
        assert_eq!(&data[4 + 32..4 + 64], &expected);
    }

    #[test]
    fn burn_direction_encodes_unlock() {
        let call = BridgeCall {
            direction: Direction::Burn,
            recipient: Address::zero(),
            amount: U256::one(),
            event_id: U256::one(),
        };
        assert_eq!(
            &call.calldata()[..4],
            selector("unlock(address,uint256,uint256)").as_slice()
        );
    }

    #[test]
    fn is_processed_roundtrip() {
        let data = is_processed_calldata(U256::from(9u64));
        assert_eq!(&data[..4], selector("isProcessed(uint256)").as_slice());

        let yes = abi::encode(&[Token::Bool(true)]);
        let no = abi::encode(&[Token::Bool(false)]);
        assert!(decode_is_processed(&yes).unwrap());
        assert!(!decode_is_processed(&no).unwrap());
        assert!(decode_is_processed(&[]).is_err());
    }

    #[test]
    fn event_id_hex_is_fixed_width() {
        let rendered = event_id_hex(U256::from(0xABCu64));
        assert_eq!(rendered.len(), 66);
        assert!(rendered.ends_with("abc"));
    }
}
