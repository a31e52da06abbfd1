//! Contract bindings for the arbiter registry, escrow factory and escrow.
//!
//! Only the methods and events the cache reads are declared. Output names of
//! `getProjectDetails` follow the deployed contract so the generated return
//! struct fields line up with it.

use alloy::sol;

sol! {
    #[sol(rpc)]
    contract ArbiterRegistry {
        event ArbiterAdded(address indexed arbiterAddress, string name);
        event ArbiterRemoved(address indexed arbiterAddress);

        function arbiterList(uint256 index) external view returns (address);
        function arbiters(address arbiter)
            external
            view
            returns (string name, string profileHash, bool isActive);
        function isArbiterActive(address arbiterAddress) external view returns (bool);
    }

    #[sol(rpc)]
    contract EscrowFactory {
        event EscrowCreated(
            address indexed escrowAddress,
            address indexed client,
            address indexed freelancer,
            uint256 totalAmount
        );

        function getEscrowContracts() external view returns (address[] memory);
    }

    #[sol(rpc)]
    contract Escrow {
        function getProjectDetails()
            external
            view
            returns (
                address _client,
                address _freelancer,
                address _arbiter,
                uint256 _totalAmount,
                string _projectDescription,
                uint8 _currentStatus,
                uint8 _workStatus,
                string _workSubmission
            );

        function token() external view returns (address);
    }
}
