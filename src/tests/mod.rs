mod provider_integration_tests;
