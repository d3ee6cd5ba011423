use uuid::Uuid;

use crate::transport::node_id::NodeId;

/// convenience method for unit test code: create a [NodeId] based on a number, the same
///  number generating the same id and the ordering of ids following the ordering of the
///  numbers
pub fn test_node_id_from_number(number: u16) -> NodeId {
    NodeId::from_raw(Uuid::from_u128(number as u128))
}
