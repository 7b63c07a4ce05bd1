pub mod role_oracle;
